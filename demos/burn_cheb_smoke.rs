//! Minimal Burn ChebConv smoke example.
//!
//! Run:
//!   cargo run -p percolo --example burn_cheb_smoke --features backend-burn

#[cfg(not(feature = "backend-burn"))]
fn main() {
    eprintln!("This example requires `--features backend-burn`.");
}

#[cfg(feature = "backend-burn")]
fn main() {
    use burn::tensor::backend::Backend;
    use burn::tensor::TensorData;
    use burn_ndarray::NdArray;
    use percolo::burn_cheb::BurnChebConvConfig;

    type B = NdArray<f32>;

    let device = <B as Backend>::Device::default();
    let layer = BurnChebConvConfig::new(3, 4).with_k(2).init::<B>(&device);

    // 3-node path graph: rescaled normalized Laplacian and identity
    // features.
    let s = std::f32::consts::FRAC_1_SQRT_2;
    let operator = burn::tensor::Tensor::<B, 2>::from_data(
        TensorData::new(vec![0.0, -s, 0.0, -s, 0.0, -s, 0.0, -s, 0.0], [3, 3]),
        &device,
    );
    let x = burn::tensor::Tensor::<B, 2>::from_data(
        TensorData::new(
            vec![1.0f32, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
            [3, 3],
        ),
        &device,
    );

    let y = layer.forward(x, operator);
    println!("y dims: {:?}", y.dims());
}
