use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};

use crate::detection::domain::model_variant::ModelVariant;
use crate::detection::infrastructure::blazeface_net::BlazeFaceNet;

/// The standard BlazeFace SSD anchors: 16x16 cells x 2, then 8x8 cells x 6,
/// unit width and height. Both variants share this normalized table.
pub fn anchor_table() -> Vec<[f32; 4]> {
    let mut anchors = Vec::with_capacity(896);
    for (grid, per_cell) in [(16usize, 2usize), (8, 6)] {
        for y in 0..grid {
            for x in 0..grid {
                let cx = (x as f32 + 0.5) / grid as f32;
                let cy = (y as f32 + 0.5) / grid as f32;
                for _ in 0..per_cell {
                    anchors.push([cx, cy, 1.0, 1.0]);
                }
            }
        }
    }
    anchors
}

pub fn anchor_tensor(device: &Device) -> Tensor {
    let flat: Vec<f32> = anchor_table().into_iter().flatten().collect();
    Tensor::from_vec(flat, (896, 4), device).unwrap()
}

/// A network whose every parameter is zero, with anchors loaded.
pub fn zero_net(variant: ModelVariant) -> BlazeFaceNet {
    let vb = VarBuilder::zeros(DType::F32, &Device::Cpu);
    let mut net = BlazeFaceNet::new(variant, vb).unwrap();
    net.load_anchors(&anchor_tensor(&Device::Cpu)).unwrap();
    net
}

/// A `VarMap` holding every parameter of `variant`, all zero.
pub fn zero_varmap(variant: ModelVariant) -> VarMap {
    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
    BlazeFaceNet::new(variant, vb).unwrap();
    for var in varmap.all_vars() {
        var.set(&var.zeros_like().unwrap()).unwrap();
    }
    varmap
}

fn push_unicode(pickle: &mut Vec<u8>, s: &str) {
    pickle.push(b'X');
    pickle.extend((s.len() as u32).to_le_bytes());
    pickle.extend(s.as_bytes());
}

fn push_int(pickle: &mut Vec<u8>, v: usize) {
    pickle.push(b'J');
    pickle.extend((v as i32).to_le_bytes());
}

fn push_int_tuple(pickle: &mut Vec<u8>, values: &[usize]) {
    pickle.push(b'(');
    for &v in values {
        push_int(pickle, v);
    }
    pickle.push(b't');
}

/// Save every parameter in `varmap` as a zip-format PyTorch checkpoint:
/// `archive/data.pkl` holding an `OrderedDict` of `_rebuild_tensor_v2`
/// calls, one float32 storage per tensor under `archive/data/`.
pub fn write_pth(path: &Path, varmap: &VarMap) {
    const ORDERED_DICT: &[u8] = b"ccollections\nOrderedDict\n)R";

    let vars = varmap.data().lock().unwrap();
    let mut names: Vec<&String> = vars.keys().collect();
    names.sort();

    let mut pickle = vec![0x80, 0x02];
    pickle.extend(ORDERED_DICT);
    let mut storages = Vec::with_capacity(names.len());
    for (key, name) in names.iter().enumerate() {
        let tensor = vars[*name].as_tensor();
        let dims = tensor.dims().to_vec();
        let mut strides = vec![1usize; dims.len()];
        for i in (0..dims.len().saturating_sub(1)).rev() {
            strides[i] = strides[i + 1] * dims[i + 1];
        }

        push_unicode(&mut pickle, name);
        pickle.extend(b"ctorch._utils\n_rebuild_tensor_v2\n(");
        pickle.push(b'(');
        push_unicode(&mut pickle, "storage");
        pickle.extend(b"ctorch\nFloatStorage\n");
        push_unicode(&mut pickle, &key.to_string());
        push_unicode(&mut pickle, "cpu");
        push_int(&mut pickle, tensor.elem_count());
        pickle.extend(b"tQ");
        push_int(&mut pickle, 0);
        push_int_tuple(&mut pickle, &dims);
        push_int_tuple(&mut pickle, &strides);
        pickle.push(0x89);
        pickle.extend(ORDERED_DICT);
        pickle.extend(b"tRs");

        let values = tensor.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        let bytes: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        storages.push((format!("archive/data/{key}"), bytes));
    }
    pickle.push(b'.');

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Stored);
    let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
    zip.start_file("archive/data.pkl", options).unwrap();
    zip.write_all(&pickle).unwrap();
    for (name, bytes) in storages {
        zip.start_file(name, options).unwrap();
        zip.write_all(&bytes).unwrap();
    }
    zip.finish().unwrap();
}

/// Write an all-zero weights file (`.safetensors`) and anchors (`.npy`)
/// for `variant` into `dir`.
pub fn write_zero_model(dir: &Path, variant: ModelVariant) -> (PathBuf, PathBuf) {
    let varmap = zero_varmap(variant);
    let weights = dir.join("weights.safetensors");
    let anchors = dir.join("anchors.npy");
    varmap.save(&weights).unwrap();
    anchor_tensor(&Device::Cpu).write_npy(&anchors).unwrap();
    (weights, anchors)
}
