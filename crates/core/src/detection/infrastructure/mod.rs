pub mod blazeface_detector;
pub mod blazeface_net;
pub mod decoding;
pub mod detect;
pub mod device;
pub mod math;
pub mod model_resolver;
