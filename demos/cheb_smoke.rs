//! Minimal ChebConv smoke example (Candle backend).
//!
//! Run:
//!   cargo run -p percolo --example cheb_smoke

use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use percolo::{ChebConv, ChebConvConfig};

fn main() -> percolo::Result<()> {
    let dev = &Device::Cpu;
    let dtype = DType::F32;

    let n = 6usize;
    let d = 4usize;

    // Ring graph adjacency.
    let mut adjacency = vec![0f32; n * n];
    for i in 0..n {
        let j = (i + 1) % n;
        adjacency[i * n + j] = 1.0;
        adjacency[j * n + i] = 1.0;
    }
    let adjacency = Tensor::from_vec(adjacency, (n, n), dev)?;
    let operator = ChebConv::preprocess(&adjacency)?;

    let x = Tensor::randn(0f32, 1f32, (n, d), dev)?.to_dtype(dtype)?;

    let varmap = VarMap::new();
    let vb = VarBuilder::from_varmap(&varmap, dtype, dev);
    let mut layer = ChebConv::new(
        8,
        ChebConvConfig {
            k: 3,
            ..Default::default()
        },
    )?;
    layer.build(d, vb)?;

    let y = layer.forward(&x, &operator)?;
    let (yn, yd) = y.dims2()?;
    println!("y shape: [{yn}, {yd}]");

    Ok(())
}
