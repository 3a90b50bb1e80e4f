//! Numeric kernels behind every [`Op`](crate::Op).
//!
//! Eager model execution and recorded program execution both land here, so a program that
//! carries the model's exact weights reproduces the model's outputs bit for bit.

use crate::GraphError;
use ndarray::{ArrayD, Axis, Ix1, Ix2, IxDyn, Slice};

fn shape_err(op: &'static str, reason: impl Into<String>) -> GraphError {
    GraphError::Shape {
        op,
        reason: reason.into(),
    }
}

fn expect_rank(op: &'static str, tensor: &ArrayD<f32>, rank: usize) -> Result<(), GraphError> {
    if tensor.ndim() != rank {
        return Err(GraphError::Rank {
            op,
            expected: rank,
            actual: tensor.shape().to_vec(),
        });
    }
    Ok(())
}

/// 2D convolution over an NCHW input with an OIHW weight.
pub fn conv2d(
    input: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    bias: &ArrayD<f32>,
    stride: usize,
    padding: usize,
) -> Result<ArrayD<f32>, GraphError> {
    const OP: &str = "conv2d";
    expect_rank(OP, input, 4)?;
    expect_rank(OP, weight, 4)?;
    expect_rank(OP, bias, 1)?;
    if stride == 0 {
        return Err(shape_err(OP, "stride must be positive"));
    }

    let (n, c, h, w) = (
        input.shape()[0],
        input.shape()[1],
        input.shape()[2],
        input.shape()[3],
    );
    let (o, wc, kh, kw) = (
        weight.shape()[0],
        weight.shape()[1],
        weight.shape()[2],
        weight.shape()[3],
    );
    if wc != c {
        return Err(shape_err(
            OP,
            format!("input has {c} channels, weight expects {wc}"),
        ));
    }
    if bias.len() != o {
        return Err(shape_err(
            OP,
            format!("bias has {} entries for {o} output channels", bias.len()),
        ));
    }
    if h + 2 * padding < kh || w + 2 * padding < kw {
        return Err(shape_err(
            OP,
            format!("kernel {kh}x{kw} larger than padded input {h}x{w}"),
        ));
    }
    let out_h = (h + 2 * padding - kh) / stride + 1;
    let out_w = (w + 2 * padding - kw) / stride + 1;

    let x = input.as_standard_layout();
    let k = weight.as_standard_layout();
    let xs = x
        .as_slice()
        .ok_or_else(|| shape_err(OP, "input is not contiguous"))?;
    let ks = k
        .as_slice()
        .ok_or_else(|| shape_err(OP, "weight is not contiguous"))?;

    let bias_values: Vec<f32> = bias.iter().copied().collect();
    let plane_len = out_h * out_w;
    let mut out = vec![0.0f32; n * o * plane_len];
    for b in 0..n {
        for oc in 0..o {
            let plane_start = (b * o + oc) * plane_len;
            let plane = &mut out[plane_start..plane_start + plane_len];
            plane.fill(bias_values[oc]);

            for ic in 0..c {
                let x_start = (b * c + ic) * h * w;
                let x_plane = &xs[x_start..x_start + h * w];
                for ky in 0..kh {
                    for kx in 0..kw {
                        let wv = ks[((oc * c + ic) * kh + ky) * kw + kx];
                        for oy in 0..out_h {
                            let iy = (oy * stride + ky) as isize - padding as isize;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            let row = &x_plane[iy as usize * w..(iy as usize + 1) * w];
                            let out_row = &mut plane[oy * out_w..(oy + 1) * out_w];
                            for (ox, acc) in out_row.iter_mut().enumerate() {
                                let ix = (ox * stride + kx) as isize - padding as isize;
                                if ix < 0 || ix >= w as isize {
                                    continue;
                                }
                                *acc += wv * row[ix as usize];
                            }
                        }
                    }
                }
            }
        }
    }

    ArrayD::from_shape_vec(IxDyn(&[n, o, out_h, out_w]), out)
        .map_err(|e| shape_err(OP, e.to_string()))
}

pub fn relu(input: &ArrayD<f32>) -> ArrayD<f32> {
    input.mapv(|v| v.max(0.0))
}

/// Average each NCHW channel plane down to 1x1.
pub fn global_avg_pool(input: &ArrayD<f32>) -> Result<ArrayD<f32>, GraphError> {
    const OP: &str = "global_avg_pool";
    expect_rank(OP, input, 4)?;
    let (n, c, h, w) = (
        input.shape()[0],
        input.shape()[1],
        input.shape()[2],
        input.shape()[3],
    );
    if h * w == 0 {
        return Err(shape_err(OP, "empty spatial extent"));
    }

    let x = input.as_standard_layout();
    let xs = x
        .as_slice()
        .ok_or_else(|| shape_err(OP, "input is not contiguous"))?;
    let area = h * w;
    let pooled: Vec<f32> = xs
        .chunks_exact(area)
        .map(|plane| plane.iter().sum::<f32>() / area as f32)
        .collect();

    ArrayD::from_shape_vec(IxDyn(&[n, c, 1, 1]), pooled).map_err(|e| shape_err(OP, e.to_string()))
}

/// Collapse every axis from `start_dim` onward into one.
pub fn flatten(input: &ArrayD<f32>, start_dim: usize) -> Result<ArrayD<f32>, GraphError> {
    if start_dim >= input.ndim() {
        return Err(shape_err(
            "flatten",
            format!("start_dim {start_dim} out of range for rank {}", input.ndim()),
        ));
    }
    let mut dims = input.shape()[..start_dim].to_vec();
    dims.push(input.shape()[start_dim..].iter().product());
    relayout("flatten", input, dims)
}

/// `input @ weight^T + bias` for a `(batch, in)` input and an `(out, in)` weight.
pub fn linear(
    input: &ArrayD<f32>,
    weight: &ArrayD<f32>,
    bias: &ArrayD<f32>,
) -> Result<ArrayD<f32>, GraphError> {
    const OP: &str = "linear";
    let x = input.view().into_dimensionality::<Ix2>().map_err(|_| GraphError::Rank {
        op: OP,
        expected: 2,
        actual: input.shape().to_vec(),
    })?;
    let k = weight.view().into_dimensionality::<Ix2>().map_err(|_| GraphError::Rank {
        op: OP,
        expected: 2,
        actual: weight.shape().to_vec(),
    })?;
    let b = bias.view().into_dimensionality::<Ix1>().map_err(|_| GraphError::Rank {
        op: OP,
        expected: 1,
        actual: bias.shape().to_vec(),
    })?;
    if x.ncols() != k.ncols() {
        return Err(shape_err(
            OP,
            format!("input width {} does not match weight width {}", x.ncols(), k.ncols()),
        ));
    }
    if b.len() != k.nrows() {
        return Err(shape_err(
            OP,
            format!("bias has {} entries for {} outputs", b.len(), k.nrows()),
        ));
    }

    let mut y = x.dot(&k.t());
    y += &b;
    Ok(y.into_dyn())
}

/// Reshape with at most one `-1` dimension inferred from the element count.
pub fn reshape(input: &ArrayD<f32>, shape: &[i64]) -> Result<ArrayD<f32>, GraphError> {
    const OP: &str = "reshape";
    let total = input.len();
    let mut inferred = None;
    let mut known = 1usize;
    for (i, &d) in shape.iter().enumerate() {
        match d {
            -1 if inferred.is_none() => inferred = Some(i),
            -1 => return Err(shape_err(OP, "more than one inferred dimension")),
            d if d > 0 => known *= d as usize,
            d => return Err(shape_err(OP, format!("invalid dimension {d}"))),
        }
    }

    let mut dims: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    if let Some(i) = inferred {
        if known == 0 || total % known != 0 {
            return Err(shape_err(
                OP,
                format!("cannot infer dimension: {total} elements into {shape:?}"),
            ));
        }
        dims[i] = total / known;
    } else if known != total {
        return Err(shape_err(
            OP,
            format!("{total} elements do not fit shape {shape:?}"),
        ));
    }
    relayout(OP, input, dims)
}

/// Take `start..end` along `axis`.
pub fn slice(
    input: &ArrayD<f32>,
    axis: usize,
    start: usize,
    end: usize,
) -> Result<ArrayD<f32>, GraphError> {
    if axis >= input.ndim() || start > end || end > input.shape()[axis] {
        return Err(shape_err(
            "slice",
            format!("range {start}..{end} on axis {axis} out of bounds for {:?}", input.shape()),
        ));
    }
    Ok(input
        .slice_axis(Axis(axis), Slice::from(start..end))
        .to_owned())
}

/// Drop a length-1 axis.
pub fn squeeze(input: &ArrayD<f32>, axis: usize) -> Result<ArrayD<f32>, GraphError> {
    if axis >= input.ndim() || input.shape()[axis] != 1 {
        return Err(shape_err(
            "squeeze",
            format!("axis {axis} is not a unit axis of {:?}", input.shape()),
        ));
    }
    Ok(input.index_axis(Axis(axis), 0).to_owned())
}

fn relayout(op: &'static str, input: &ArrayD<f32>, dims: Vec<usize>) -> Result<ArrayD<f32>, GraphError> {
    ArrayD::from_shape_vec(IxDyn(&dims), input.iter().copied().collect())
        .map_err(|e| shape_err(op, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    fn tensor(shape: &[usize], data: Vec<f32>) -> ArrayD<f32> {
        ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
    }

    #[test]
    fn test_conv2d_identity_kernel_with_padding() {
        let input = tensor(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let mut k = vec![0.0; 9];
        k[4] = 1.0;
        let weight = tensor(&[1, 1, 3, 3], k);
        let bias = tensor(&[1], vec![0.5]);

        let out = conv2d(&input, &weight, &bias, 1, 1).unwrap();
        assert_eq!(out.shape(), &[1, 1, 2, 2]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![1.5, 2.5, 3.5, 4.5]);
    }

    #[test]
    fn test_conv2d_box_kernel_sums_neighbourhood() {
        let input = tensor(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]);
        let weight = tensor(&[1, 1, 3, 3], vec![1.0; 9]);
        let bias = tensor(&[1], vec![0.0]);

        let out = conv2d(&input, &weight, &bias, 1, 1).unwrap();
        // every output sees the whole 2x2 input
        assert!(out.iter().all(|&v| v == 10.0));
    }

    #[test]
    fn test_conv2d_rejects_channel_mismatch() {
        let input = ArrayD::zeros(IxDyn(&[1, 3, 4, 4]));
        let weight = ArrayD::zeros(IxDyn(&[2, 1, 3, 3]));
        let bias = ArrayD::zeros(IxDyn(&[2]));
        assert!(matches!(
            conv2d(&input, &weight, &bias, 1, 1),
            Err(GraphError::Shape { op: "conv2d", .. })
        ));
    }

    #[test]
    fn test_global_avg_pool() {
        let input = tensor(&[1, 2, 1, 2], vec![1.0, 3.0, -2.0, 2.0]);
        let out = global_avg_pool(&input).unwrap();
        assert_eq!(out.shape(), &[1, 2, 1, 1]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![2.0, 0.0]);
    }

    #[test]
    fn test_linear() {
        let input = tensor(&[1, 2], vec![1.0, 2.0]);
        let weight = tensor(&[3, 2], vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0]);
        let bias = tensor(&[3], vec![0.0, 1.0, -1.0]);
        let out = linear(&input, &weight, &bias).unwrap();
        assert_eq!(out.shape(), &[1, 3]);
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![1.0, 3.0, 2.0]);
    }

    #[test]
    fn test_reshape_infers_one_dimension() {
        let input = ArrayD::zeros(IxDyn(&[1, 28]));
        let out = reshape(&input, &[1, -1, 14]).unwrap();
        assert_eq!(out.shape(), &[1, 2, 14]);

        assert!(reshape(&input, &[-1, -1]).is_err());
        assert!(reshape(&input, &[1, -1, 5]).is_err());
    }

    #[test]
    fn test_flatten_slice_squeeze() {
        let input = ArrayD::from_shape_fn(IxDyn(&[1, 2, 1, 1]), |i| i[1] as f32);
        let flat = flatten(&input, 1).unwrap();
        assert_eq!(flat.shape(), &[1, 2]);

        let sliced = slice(&flat, 1, 1, 2).unwrap();
        assert_eq!(sliced.shape(), &[1, 1]);
        assert_eq!(sliced[[0, 0]], 1.0);

        let squeezed = squeeze(&sliced, 0).unwrap();
        assert_eq!(squeezed.shape(), &[1]);
        assert!(squeeze(&flat, 1).is_err());
    }
}
