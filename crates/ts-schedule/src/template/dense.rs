use tracing::debug;
use ts_ir::{ComputeGraph, ComputeOp, DType, DimExtent, IrError, Shape, TensorDesc};

use crate::error::{ConfigSpaceError, Result};
use crate::records::{TuningContext, Workload};
use crate::schedule::{IterVarId, Schedule};
use crate::space::ConfigSpace;
use crate::template::ComputeOutput;

pub const DENSE_PACK_TASK: &str = "dense_pack.x86";
pub const DENSE_NOPACK_TASK: &str = "dense_nopack.x86";

/// `(M, N, K)` of `data[M, K] x weight[N, K]^T`.
fn dense_dims(inputs: &[TensorDesc]) -> Result<(DimExtent, DimExtent, DimExtent)> {
    let (data, weight) = match inputs {
        [data, weight, ..] => (data, weight),
        _ => {
            return Err(IrError::Other(format!(
                "dense expects data and weight, got {} inputs",
                inputs.len()
            ))
            .into())
        }
    };
    for t in [data, weight] {
        if t.ndim() != 2 {
            return Err(IrError::ShapeMismatch {
                expected: "rank-2 tensor".to_string(),
                got: t.to_string(),
            }
            .into());
        }
    }
    let (m, k) = (data.shape().dim(0), data.shape().dim(1));
    let (n, wk) = (weight.shape().dim(0), weight.shape().dim(1));
    if let (Some(a), Some(b)) = (k.known(), wk.known()) {
        if a != b {
            return Err(IrError::ShapeMismatch {
                expected: format!("weight reduction extent {}", a),
                got: b.to_string(),
            }
            .into());
        }
    }
    Ok((m, n, k))
}

fn exact(extent: DimExtent, factor: usize, axis: &str) -> Result<DimExtent> {
    extent.div_exact(factor).ok_or_else(|| {
        ConfigSpaceError::NonDivisibleSplit {
            axis: axis.to_string(),
            extent: extent.heuristic_size(),
            factor,
        }
        .into()
    })
}

/// Dense with the weight pre-transposed into `[N / bn, K, bn]` column
/// panels, `bn` being the innermost column tile.
pub fn dense_pack(inputs: &[TensorDesc], out_dtype: DType, ctx: &TuningContext) -> Result<ComputeOutput> {
    let (m, n, k) = dense_dims(inputs)?;
    let mut space = ConfigSpace::new();
    space.declare_split("tile_y", m, 3)?;
    space.declare_split("tile_x", n, 3)?;
    space.declare_split("tile_k", k, 2)?;
    let selected = ctx.query(&Workload::new(DENSE_PACK_TASK, &inputs[..2]), &space);

    let bn = selected.entity.split("tile_x")?.inner();
    let panels = exact(n, bn, "tile_x")?;
    let packed = ComputeOp::new(
        "packed_weight",
        "packed_weight",
        &Shape::new(vec![panels, k, DimExtent::Known(bn)]),
        inputs[1].dtype(),
    )
    .with_axis_names(&["z", "y", "x"])
    .reads(inputs[1].name());
    let dense = ComputeOp::new("dense_pack", "dense_pack", &Shape::new(vec![m, n]), out_dtype)
        .with_axis_names(&["y", "x"])
        .with_reduce_axis("k", k)
        .reads(inputs[0].name())
        .reads("packed_weight");

    let graph = ComputeGraph::new(inputs[..2].to_vec())
        .with_op(packed)?
        .with_op(dense)?;
    Ok(ComputeOutput::with_config(graph, selected))
}

/// Dense that reads the weight in its natural layout and vectorizes a
/// partial reduction over the innermost `K` block.
pub fn dense_nopack(inputs: &[TensorDesc], out_dtype: DType, ctx: &TuningContext) -> Result<ComputeOutput> {
    let (m, n, k) = dense_dims(inputs)?;
    let mut space = ConfigSpace::new();
    space.declare_split("tile_y", m, 2)?;
    space.declare_split("tile_x", n, 2)?;
    space.declare_split("tile_k", k, 2)?;
    let selected = ctx.query(&Workload::new(DENSE_NOPACK_TASK, &inputs[..2]), &space);

    let vec = selected.entity.split("tile_k")?.inner();
    let k_outer = exact(k, vec, "tile_k")?;
    let partial = ComputeOp::new(
        "dense_nopack.partial",
        "dense_nopack.partial",
        &Shape::new(vec![m, n, DimExtent::Known(vec)]),
        out_dtype,
    )
    .with_axis_names(&["z", "y", "x"])
    .with_reduce_axis("k", k_outer)
    .reads(inputs[0].name())
    .reads(inputs[1].name());
    let dense = ComputeOp::new("dense_nopack", "dense_nopack", &Shape::new(vec![m, n]), out_dtype)
        .with_axis_names(&["y", "x"])
        .with_reduce_axis("kk", DimExtent::Known(vec))
        .reads("dense_nopack.partial");

    let graph = ComputeGraph::new(inputs[..2].to_vec())
        .with_op(partial)?
        .with_op(dense)?;
    Ok(ComputeOutput::with_config(graph, selected))
}

/// Blocked schedule for [`dense_pack`]: tiled output with a cached
/// accumulator computed per fused tile, plus a parallel weight packing loop.
pub fn schedule_dense_pack(output: &ComputeOutput) -> Result<Schedule> {
    let cfg = output.entity()?;
    let mut s = Schedule::create(&output.graph);
    let c = s.stage_by_tag("dense_pack")?;
    let packed = s.stage_by_tag("packed_weight")?;
    debug!(config = %cfg, "applying dense_pack template");

    let cc = s.cache_write(c)?;
    let y = s.axis(c, 0)?;
    let x = s.axis(c, 1)?;
    let k = s.reduce_axis(cc, 0)?;

    let tile_y = cfg.split("tile_y")?.apply(&mut s, c, y)?;
    let tile_x = cfg.split("tile_x")?.apply(&mut s, c, x)?;
    let [yt, yo, yi] = three(&tile_y)?;
    let [xt, xo, xi] = three(&tile_x)?;
    s.reorder(c, &[yt, xt, yo, xo, yi, xi])?;
    let xyt = s.fuse(c, yt, xt)?;
    s.parallel(c, xyt)?;
    let xyo = s.fuse(c, yo, xo)?;
    s.unroll(c, yi)?;
    s.vectorize(c, xi)?;

    s.compute_at(cc, c, xyo)?;
    let cy = s.axis(cc, 0)?;
    let cx = s.axis(cc, 1)?;
    let tile_k = cfg.split("tile_k")?.apply(&mut s, cc, k)?;
    let (ko, ki) = (tile_k[0], tile_k[tile_k.len() - 1]);
    s.reorder(cc, &[ko, ki, cy, cx])?;
    s.vectorize(cc, cx)?;
    s.unroll(cc, cy)?;
    s.unroll(cc, ki)?;

    let z = s.axis(packed, 0)?;
    let py = s.axis(packed, 1)?;
    let px = s.axis(packed, 2)?;
    s.reorder(packed, &[z, px, py])?;
    s.parallel(packed, z)?;
    s.vectorize(packed, py)?;
    Ok(s)
}

/// Schedule for [`dense_nopack`]: parallel fused output tiles, with the
/// partial reduction computed inside each tile.
pub fn schedule_dense_nopack(output: &ComputeOutput) -> Result<Schedule> {
    let cfg = output.entity()?;
    let mut s = Schedule::create(&output.graph);
    let c = s.stage_by_tag("dense_nopack")?;
    let cc = s.stage_by_tag("dense_nopack.partial")?;
    debug!(config = %cfg, "applying dense_nopack template");

    let y = s.axis(c, 0)?;
    let x = s.axis(c, 1)?;
    let kk = s.reduce_axis(c, 0)?;
    let tile_y = cfg.split("tile_y")?.apply(&mut s, c, y)?;
    let tile_x = cfg.split("tile_x")?.apply(&mut s, c, x)?;
    let (yo, yi) = (tile_y[0], tile_y[tile_y.len() - 1]);
    let (xo, xi) = (tile_x[0], tile_x[tile_x.len() - 1]);
    s.reorder(c, &[yo, xo, yi, xi])?;
    let xyo = s.fuse(c, yo, xo)?;
    s.parallel(c, xyo)?;
    s.unroll(c, kk)?;

    s.compute_at(cc, c, xyo)?;
    let z = s.axis(cc, 0)?;
    let cy = s.axis(cc, 1)?;
    let cx = s.axis(cc, 2)?;
    let k = s.reduce_axis(cc, 0)?;
    let yz = s.fuse(cc, z, cy)?;
    s.reorder(cc, &[k, yz, cx])?;
    s.unroll(cc, yz)?;
    s.vectorize(cc, cx)?;
    Ok(s)
}

fn three(chain: &[IterVarId]) -> Result<[IterVarId; 3]> {
    match chain {
        [a, b, c] => Ok([*a, *b, *c]),
        _ => Err(ConfigSpaceError::ArityMismatch {
            knob: "tile".to_string(),
            expected: 3,
            got: chain.len(),
        }
        .into()),
    }
}
