use std::collections::BTreeMap;
use std::fmt::Write as _;

use ts_ir::{AxisKind, ComputeGraph, DimExtent};

use crate::error::{ConfigSpaceError, Result, ScheduleError};

/// Handle to a stage inside one [`Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StageId(usize);

/// Handle to an iteration variable inside one [`Schedule`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IterVarId(usize);

/// Execution hint attached to a leaf loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Annotation {
    Parallel,
    Vectorize,
    Unroll,
}

impl Annotation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Annotation::Parallel => "parallel",
            Annotation::Vectorize => "vectorize",
            Annotation::Unroll => "unroll",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterVar {
    pub name: String,
    pub extent: DimExtent,
    pub kind: AxisKind,
}

/// Where a stage's loop nest is emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachPoint {
    /// At the top level of the program.
    Root,
    /// Inside the loop over `axis` of `consumer`, before the loops nested
    /// below `axis`.
    At { consumer: StageId, axis: IterVarId },
}

/// The loop nest of one compute op.
#[derive(Debug, Clone)]
pub struct Stage {
    name: String,
    tag: String,
    root_axes: Vec<IterVarId>,
    root_reduce: Vec<IterVarId>,
    leaves: Vec<IterVarId>,
    annotations: BTreeMap<IterVarId, Annotation>,
    attach: AttachPoint,
    reads: Vec<String>,
    transformed: bool,
}

impl Stage {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Current loop order, outermost first.
    pub fn leaves(&self) -> &[IterVarId] {
        &self.leaves
    }

    pub fn attach(&self) -> AttachPoint {
        self.attach
    }

    /// Names of the tensors this stage reads.
    pub fn reads(&self) -> &[String] {
        &self.reads
    }
}

/// One loop-transformation step, in the order it was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Directive {
    CacheWrite {
        stage: StageId,
        cache: StageId,
    },
    Split {
        stage: StageId,
        parent: IterVarId,
        outer: IterVarId,
        inner: IterVarId,
        factor: usize,
    },
    Reorder {
        stage: StageId,
        order: Vec<IterVarId>,
    },
    Fuse {
        stage: StageId,
        outer: IterVarId,
        inner: IterVarId,
        fused: IterVarId,
    },
    Annotate {
        stage: StageId,
        axis: IterVarId,
        annotation: Annotation,
    },
    ComputeAt {
        stage: StageId,
        consumer: StageId,
        axis: IterVarId,
    },
}

/// Loop-transformation directives attached to a compute graph.
///
/// Every mutating call checks its preconditions before touching any state,
/// so a failed call leaves the schedule unchanged.
#[derive(Debug, Clone)]
pub struct Schedule {
    iter_vars: Vec<IterVar>,
    stages: Vec<Stage>,
    order: Vec<StageId>,
    directives: Vec<Directive>,
}

impl Schedule {
    /// One root stage per compute op, in graph order. Leaves start as the
    /// spatial axes followed by the reduce axes.
    pub fn create(graph: &ComputeGraph) -> Schedule {
        let mut sch = Schedule {
            iter_vars: Vec::new(),
            stages: Vec::new(),
            order: Vec::new(),
            directives: Vec::new(),
        };
        for op in graph.ops() {
            let root_axes: Vec<IterVarId> = op
                .axes
                .iter()
                .map(|a| sch.new_iter_var(a.name.clone(), a.extent, a.kind))
                .collect();
            let root_reduce: Vec<IterVarId> = op
                .reduce_axes
                .iter()
                .map(|a| sch.new_iter_var(a.name.clone(), a.extent, a.kind))
                .collect();
            let leaves = root_axes.iter().chain(root_reduce.iter()).copied().collect();
            let id = StageId(sch.stages.len());
            sch.stages.push(Stage {
                name: op.name.clone(),
                tag: op.tag.clone(),
                root_axes,
                root_reduce,
                leaves,
                annotations: BTreeMap::new(),
                attach: AttachPoint::Root,
                reads: op.inputs.clone(),
                transformed: false,
            });
            sch.order.push(id);
        }
        sch
    }

    fn new_iter_var(&mut self, name: String, extent: DimExtent, kind: AxisKind) -> IterVarId {
        self.iter_vars.push(IterVar { name, extent, kind });
        IterVarId(self.iter_vars.len() - 1)
    }

    pub fn stage(&self, name: &str) -> Result<StageId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.stages[id.0].name == name)
            .ok_or_else(|| ScheduleError::UnknownStage(name.to_string()))
    }

    pub fn stage_by_tag(&self, tag: &str) -> Result<StageId> {
        self.order
            .iter()
            .copied()
            .find(|id| self.stages[id.0].tag == tag)
            .ok_or_else(|| ScheduleError::MissingTag {
                tag: tag.to_string(),
            })
    }

    pub fn get(&self, stage: StageId) -> &Stage {
        &self.stages[stage.0]
    }

    /// Stages in producer-before-consumer order.
    pub fn stages(&self) -> impl Iterator<Item = (StageId, &Stage)> {
        self.order.iter().map(move |&id| (id, &self.stages[id.0]))
    }

    pub fn iter_var(&self, iv: IterVarId) -> &IterVar {
        &self.iter_vars[iv.0]
    }

    pub fn directives(&self) -> &[Directive] {
        &self.directives
    }

    /// The `i`-th root spatial axis of `stage`.
    pub fn axis(&self, stage: StageId, i: usize) -> Result<IterVarId> {
        let st = self.get(stage);
        st.root_axes.get(i).copied().ok_or_else(|| ScheduleError::Ir(ts_ir::IrError::InvalidAxis {
            axis: i,
            ndim: st.root_axes.len(),
        }))
    }

    /// The `i`-th root reduce axis of `stage`.
    pub fn reduce_axis(&self, stage: StageId, i: usize) -> Result<IterVarId> {
        let st = self.get(stage);
        st.root_reduce.get(i).copied().ok_or_else(|| ScheduleError::Ir(ts_ir::IrError::InvalidAxis {
            axis: i,
            ndim: st.root_reduce.len(),
        }))
    }

    /// Names of the leaf loops of `stage`, outermost first.
    pub fn leaf_names(&self, stage: StageId) -> Vec<&str> {
        self.get(stage)
            .leaves
            .iter()
            .map(|iv| self.iter_vars[iv.0].name.as_str())
            .collect()
    }

    pub fn annotation(&self, stage: StageId, iv: IterVarId) -> Option<Annotation> {
        self.get(stage).annotations.get(&iv).copied()
    }

    /// The leaf marked parallel in `stage`, if any.
    pub fn parallel_axis(&self, stage: StageId) -> Option<IterVarId> {
        let st = self.get(stage);
        st.leaves
            .iter()
            .copied()
            .find(|iv| st.annotations.get(iv) == Some(&Annotation::Parallel))
    }

    fn leaf_pos(&self, stage: StageId, iv: IterVarId) -> Result<usize> {
        let st = self.get(stage);
        st.leaves
            .iter()
            .position(|&l| l == iv)
            .ok_or_else(|| ScheduleError::NotALeaf {
                stage: st.name.clone(),
                axis: self.iter_vars[iv.0].name.clone(),
            })
    }

    fn ensure_not_attach_point(&self, stage: StageId, iv: IterVarId) -> Result<()> {
        for st in &self.stages {
            if let AttachPoint::At { consumer, axis } = st.attach {
                if consumer == stage && axis == iv {
                    return Err(ScheduleError::Other(format!(
                        "axis '{}' of '{}' is the attach point of '{}'",
                        self.iter_vars[iv.0].name, self.stages[stage.0].name, st.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Split `iv` into `(outer, inner)` with `inner` of extent `factor`.
    ///
    /// # Errors
    /// [`ConfigSpaceError::NonDivisibleSplit`] when `factor` does not divide
    /// a known extent.
    pub fn split(&mut self, stage: StageId, iv: IterVarId, factor: usize) -> Result<(IterVarId, IterVarId)> {
        let pos = self.leaf_pos(stage, iv)?;
        self.ensure_not_attach_point(stage, iv)?;
        if factor == 0 {
            return Err(ScheduleError::Other("split factor must be positive".to_string()));
        }
        let parent = self.iter_vars[iv.0].clone();
        let outer_extent = parent.extent.div_exact(factor).ok_or_else(|| {
            ConfigSpaceError::NonDivisibleSplit {
                axis: parent.name.clone(),
                extent: parent.extent.heuristic_size(),
                factor,
            }
        })?;

        let outer = self.new_iter_var(format!("{}.outer", parent.name), outer_extent, parent.kind);
        let inner = self.new_iter_var(
            format!("{}.inner", parent.name),
            DimExtent::Known(factor),
            parent.kind,
        );
        let st = &mut self.stages[stage.0];
        st.leaves.splice(pos..=pos, [outer, inner]);
        st.transformed = true;
        self.directives.push(Directive::Split {
            stage,
            parent: iv,
            outer,
            inner,
            factor,
        });
        Ok((outer, inner))
    }

    /// Split `iv` into a chain of loops with the given extents, outermost
    /// first. The product of `factors` must equal a known extent of `iv`;
    /// this is checked before anything is split.
    pub fn split_by_factors(&mut self, stage: StageId, iv: IterVarId, factors: &[usize]) -> Result<Vec<IterVarId>> {
        self.leaf_pos(stage, iv)?;
        let parent = &self.iter_vars[iv.0];
        if factors.is_empty() {
            return Err(ConfigSpaceError::ArityMismatch {
                knob: parent.name.clone(),
                expected: 1,
                got: 0,
            }
            .into());
        }
        let product = factors.iter().fold(1usize, |acc, &f| acc.saturating_mul(f));
        if let DimExtent::Known(extent) = parent.extent {
            if product != extent {
                return Err(ConfigSpaceError::ProductMismatch {
                    axis: parent.name.clone(),
                    factors: factors.to_vec(),
                    product,
                    extent,
                }
                .into());
            }
        }

        let mut chain = Vec::with_capacity(factors.len());
        let mut rest = iv;
        for &factor in factors[1..].iter().rev() {
            let (outer, inner) = self.split(stage, rest, factor)?;
            chain.push(inner);
            rest = outer;
        }
        chain.push(rest);
        chain.reverse();
        Ok(chain)
    }

    /// Move the given leaves into the slots they jointly occupy, in the
    /// given order. Leaves not listed keep their positions.
    pub fn reorder(&mut self, stage: StageId, order: &[IterVarId]) -> Result<()> {
        let mut slots = Vec::with_capacity(order.len());
        for &iv in order {
            let pos = self.leaf_pos(stage, iv)?;
            if slots.contains(&pos) {
                return Err(ScheduleError::InvalidReorder {
                    stage: self.stages[stage.0].name.clone(),
                    reason: format!("'{}' listed twice", self.iter_vars[iv.0].name),
                });
            }
            slots.push(pos);
        }
        slots.sort_unstable();
        let st = &mut self.stages[stage.0];
        for (&slot, &iv) in slots.iter().zip(order) {
            st.leaves[slot] = iv;
        }
        st.transformed = true;
        self.directives.push(Directive::Reorder {
            stage,
            order: order.to_vec(),
        });
        Ok(())
    }

    /// Fuse two adjacent leaves, `outer` directly enclosing `inner`.
    pub fn fuse(&mut self, stage: StageId, outer: IterVarId, inner: IterVarId) -> Result<IterVarId> {
        let outer_pos = self.leaf_pos(stage, outer)?;
        let inner_pos = self.leaf_pos(stage, inner)?;
        self.ensure_not_attach_point(stage, outer)?;
        self.ensure_not_attach_point(stage, inner)?;
        let (o, i) = (&self.iter_vars[outer.0], &self.iter_vars[inner.0]);
        let fuse_error = |reason: &str| ScheduleError::InvalidFuse {
            stage: self.stages[stage.0].name.clone(),
            outer: o.name.clone(),
            inner: i.name.clone(),
            reason: reason.to_string(),
        };
        if inner_pos != outer_pos + 1 {
            return Err(fuse_error("axes are not adjacent with outer first"));
        }
        if o.kind != i.kind {
            return Err(fuse_error("cannot mix spatial and reduce axes"));
        }

        let name = format!("{}.{}.fused", o.name, i.name);
        let extent = o
            .extent
            .checked_mul(i.extent)
            .ok_or_else(|| fuse_error("fused extent overflows"))?;
        let kind = o.kind;
        let fused = self.new_iter_var(name, extent, kind);
        let st = &mut self.stages[stage.0];
        st.leaves.splice(outer_pos..=inner_pos, [fused]);
        st.transformed = true;
        self.directives.push(Directive::Fuse {
            stage,
            outer,
            inner,
            fused,
        });
        Ok(fused)
    }

    /// Mark `iv` for multi-threaded execution.
    ///
    /// A stage has at most one parallel loop, and a parallel loop may not sit
    /// inside (or contain) another stage's parallel loop.
    pub fn parallel(&mut self, stage: StageId, iv: IterVarId) -> Result<()> {
        let pos = self.leaf_pos(stage, iv)?;
        let st = self.get(stage);
        if self.iter_vars[iv.0].kind == AxisKind::Reduce {
            return Err(ScheduleError::ParallelReduce {
                stage: st.name.clone(),
                axis: self.iter_vars[iv.0].name.clone(),
            });
        }
        if let Some(existing) = self.parallel_axis(stage) {
            return Err(ScheduleError::MultipleParallel {
                stage: st.name.clone(),
                existing: self.iter_vars[existing.0].name.clone(),
            });
        }
        if let Some(outer) = self.enclosing_parallel(stage) {
            return Err(ScheduleError::NestedParallel {
                stage: st.name.clone(),
                outer: self.stages[outer.0].name.clone(),
            });
        }
        for (child, axis) in self.attached_to(stage) {
            if self.leaf_pos(stage, axis)? >= pos && self.subtree_has_parallel(child) {
                return Err(ScheduleError::NestedParallel {
                    stage: self.stages[child.0].name.clone(),
                    outer: st.name.clone(),
                });
            }
        }
        self.annotate(stage, iv, Annotation::Parallel)
    }

    pub fn vectorize(&mut self, stage: StageId, iv: IterVarId) -> Result<()> {
        self.leaf_pos(stage, iv)?;
        self.annotate(stage, iv, Annotation::Vectorize)
    }

    pub fn unroll(&mut self, stage: StageId, iv: IterVarId) -> Result<()> {
        self.leaf_pos(stage, iv)?;
        self.annotate(stage, iv, Annotation::Unroll)
    }

    fn annotate(&mut self, stage: StageId, iv: IterVarId, annotation: Annotation) -> Result<()> {
        let st = &mut self.stages[stage.0];
        if let Some(existing) = st.annotations.get(&iv) {
            if *existing == annotation {
                return Ok(());
            }
            return Err(ScheduleError::ConflictingAnnotation {
                stage: st.name.clone(),
                axis: self.iter_vars[iv.0].name.clone(),
                existing: existing.as_str(),
            });
        }
        st.annotations.insert(iv, annotation);
        st.transformed = true;
        self.directives.push(Directive::Annotate {
            stage,
            axis: iv,
            annotation,
        });
        Ok(())
    }

    /// Redirect the reduction of `stage` into a new `<name>.global` stage
    /// that `stage` then copies from. Must run before `stage` is transformed.
    pub fn cache_write(&mut self, stage: StageId) -> Result<StageId> {
        if self.stages[stage.0].transformed {
            return Err(ScheduleError::CacheWriteAfterTransform(
                self.stages[stage.0].name.clone(),
            ));
        }
        let root_axes = self.stages[stage.0].root_axes.clone();
        let copies: Vec<IterVarId> = root_axes
            .iter()
            .map(|iv| {
                let v = self.iter_vars[iv.0].clone();
                self.new_iter_var(v.name, v.extent, v.kind)
            })
            .collect();

        let original = &mut self.stages[stage.0];
        let cache_name = format!("{}.global", original.name);
        let reduce = std::mem::take(&mut original.root_reduce);
        let reads = std::mem::replace(&mut original.reads, vec![cache_name.clone()]);
        original.leaves = original.root_axes.clone();
        original.transformed = true;

        let cache = StageId(self.stages.len());
        self.stages.push(Stage {
            name: cache_name,
            tag: "cache_write".to_string(),
            leaves: copies.iter().chain(reduce.iter()).copied().collect(),
            root_axes: copies,
            root_reduce: reduce,
            annotations: BTreeMap::new(),
            attach: AttachPoint::Root,
            reads,
            transformed: false,
        });
        let pos = self
            .order
            .iter()
            .position(|&id| id == stage)
            .ok_or_else(|| ScheduleError::Other("stage missing from schedule order".to_string()))?;
        self.order.insert(pos, cache);
        self.directives.push(Directive::CacheWrite { stage, cache });
        Ok(cache)
    }

    /// Emit `stage` inside the loop `axis` of `consumer`, so each iteration
    /// of that loop produces exactly the slice of `stage` it then reads.
    pub fn compute_at(&mut self, stage: StageId, consumer: StageId, axis: IterVarId) -> Result<()> {
        let invalid = |reason: &str| ScheduleError::InvalidComputeAt {
            stage: self.stages[stage.0].name.clone(),
            consumer: self.stages[consumer.0].name.clone(),
            reason: reason.to_string(),
        };
        if stage == consumer {
            return Err(invalid("a stage cannot be attached to itself"));
        }
        if !self.stages[consumer.0]
            .reads
            .iter()
            .any(|r| *r == self.stages[stage.0].name)
        {
            return Err(invalid("consumer does not read the stage"));
        }
        if self.stages[stage.0].attach != AttachPoint::Root {
            return Err(invalid("stage is already attached"));
        }
        let order_of = |id: StageId| self.order.iter().position(|&s| s == id);
        if order_of(stage) >= order_of(consumer) {
            return Err(invalid("producer must precede its consumer"));
        }
        let pos = self.leaf_pos(consumer, axis)?;
        if self.subtree_has_parallel(stage) {
            let inside_parallel = self
                .parallel_axis(consumer)
                .map(|p| self.leaf_pos(consumer, p).map(|pp| pp <= pos))
                .transpose()?
                .unwrap_or(false);
            if inside_parallel || self.enclosing_parallel(consumer).is_some() {
                return Err(ScheduleError::NestedParallel {
                    stage: self.stages[stage.0].name.clone(),
                    outer: self.stages[consumer.0].name.clone(),
                });
            }
        }

        let st = &mut self.stages[stage.0];
        st.attach = AttachPoint::At { consumer, axis };
        st.transformed = true;
        self.directives.push(Directive::ComputeAt {
            stage,
            consumer,
            axis,
        });
        Ok(())
    }

    /// Stages attached directly to `stage`, with their attach axes.
    fn attached_to(&self, stage: StageId) -> Vec<(StageId, IterVarId)> {
        self.order
            .iter()
            .filter_map(|&id| match self.stages[id.0].attach {
                AttachPoint::At { consumer, axis } if consumer == stage => Some((id, axis)),
                _ => None,
            })
            .collect()
    }

    fn subtree_has_parallel(&self, stage: StageId) -> bool {
        self.parallel_axis(stage).is_some()
            || self
                .attached_to(stage)
                .into_iter()
                .any(|(child, _)| self.subtree_has_parallel(child))
    }

    /// The nearest stage whose parallel loop encloses `stage` through the
    /// compute-at chain.
    fn enclosing_parallel(&self, stage: StageId) -> Option<StageId> {
        match self.stages[stage.0].attach {
            AttachPoint::Root => None,
            AttachPoint::At { consumer, axis } => {
                let attach_pos = self.leaf_pos(consumer, axis).ok()?;
                let encloses = self
                    .parallel_axis(consumer)
                    .and_then(|p| self.leaf_pos(consumer, p).ok())
                    .map_or(false, |p| p <= attach_pos);
                if encloses {
                    Some(consumer)
                } else {
                    self.enclosing_parallel(consumer)
                }
            }
        }
    }

    /// Re-check the whole-schedule invariants: attach axes are leaves, and
    /// no parallel loop is nested inside another.
    pub fn validate(&self) -> Result<()> {
        for &id in &self.order {
            let st = &self.stages[id.0];
            if let AttachPoint::At { consumer, axis } = st.attach {
                self.leaf_pos(consumer, axis)?;
            }
            if self.parallel_axis(id).is_some() {
                if let Some(outer) = self.enclosing_parallel(id) {
                    return Err(ScheduleError::NestedParallel {
                        stage: st.name.clone(),
                        outer: self.stages[outer.0].name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Pseudo-code loop nest, one line per loop or store. Attached stages are
    /// printed inside their attach loop, ahead of the loops nested below it.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for &id in &self.order {
            if self.stages[id.0].attach == AttachPoint::Root {
                self.render_stage(id, 0, &mut out);
            }
        }
        out
    }

    fn render_stage(&self, stage: StageId, depth: usize, out: &mut String) {
        let st = &self.stages[stage.0];
        let attached = self.attached_to(stage);
        for (i, &iv) in st.leaves.iter().enumerate() {
            let var = &self.iter_vars[iv.0];
            let kind = st.annotations.get(&iv).map_or("for", |a| a.as_str());
            let _ = writeln!(
                out,
                "{}{} {} in 0..{}",
                "  ".repeat(depth + i),
                kind,
                var.name,
                var.extent
            );
            for &(child, axis) in &attached {
                if axis == iv {
                    self.render_stage(child, depth + i + 1, out);
                }
            }
        }
        let _ = writeln!(out, "{}{} = ...", "  ".repeat(depth + st.leaves.len()), st.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ts_ir::{ComputeOp, DType, Shape, TensorDesc};

    fn matmul_schedule(m: usize, n: usize, k: usize) -> (Schedule, StageId) {
        let a = TensorDesc::new("a", vec![m, k], DType::Float32);
        let b = TensorDesc::new("b", vec![k, n], DType::Float32);
        let mut g = ComputeGraph::new(vec![a, b]);
        g.push(
            ComputeOp::new("c", "matmul", &Shape::from_known(&[m, n]), DType::Float32)
                .with_axis_names(&["y", "x"])
                .with_reduce_axis("k", DimExtent::Known(k))
                .reads("a")
                .reads("b"),
        )
        .unwrap();
        let s = Schedule::create(&g);
        let c = s.stage("c").unwrap();
        (s, c)
    }

    #[test]
    fn test_create_leaves() {
        let (s, c) = matmul_schedule(4, 8, 16);
        assert_eq!(s.leaf_names(c), vec!["y", "x", "k"]);
        assert_eq!(s.get(c).attach(), AttachPoint::Root);
    }

    #[test]
    fn test_split_exact() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let x = s.axis(c, 1).unwrap();
        let (xo, xi) = s.split(c, x, 4).unwrap();
        assert_eq!(s.iter_var(xo).extent, DimExtent::Known(2));
        assert_eq!(s.iter_var(xi).extent, DimExtent::Known(4));
        assert_eq!(s.leaf_names(c), vec!["y", "x.outer", "x.inner", "k"]);
    }

    #[test]
    fn test_split_non_divisible() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let x = s.axis(c, 1).unwrap();
        let err = s.split(c, x, 3).unwrap_err();
        assert_eq!(
            err,
            ScheduleError::ConfigSpace(ConfigSpaceError::NonDivisibleSplit {
                axis: "x".to_string(),
                extent: 8,
                factor: 3
            })
        );
        assert_eq!(s.leaf_names(c), vec!["y", "x", "k"]);
        assert!(s.directives().is_empty());
    }

    #[test]
    fn test_split_by_factors_product_checked_first() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let k = s.reduce_axis(c, 0).unwrap();
        assert!(matches!(
            s.split_by_factors(c, k, &[2, 2, 2]),
            Err(ScheduleError::ConfigSpace(ConfigSpaceError::ProductMismatch { .. }))
        ));
        assert!(s.directives().is_empty());

        let chain = s.split_by_factors(c, k, &[2, 4, 2]).unwrap();
        let extents: Vec<_> = chain.iter().map(|&iv| s.iter_var(iv).extent).collect();
        assert_eq!(
            extents,
            vec![DimExtent::Known(2), DimExtent::Known(4), DimExtent::Known(2)]
        );
        assert_eq!(s.get(c).leaves()[2..], chain[..]);
    }

    #[test]
    fn test_split_symbolic() {
        let a = TensorDesc::new("a", Shape::new(vec![DimExtent::Symbolic]), DType::Float32);
        let mut g = ComputeGraph::new(vec![a]);
        g.push(ComputeOp::new("b", "copy", &Shape::new(vec![DimExtent::Symbolic]), DType::Float32).reads("a"))
            .unwrap();
        let mut s = Schedule::create(&g);
        let b = s.stage("b").unwrap();
        let ax = s.axis(b, 0).unwrap();
        let chain = s.split_by_factors(b, ax, &[1, 2, 8]).unwrap();
        assert_eq!(s.iter_var(chain[0]).extent, DimExtent::Symbolic);
        assert_eq!(s.iter_var(chain[2]).extent, DimExtent::Known(8));
    }

    #[test]
    fn test_reorder_and_fuse() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let y = s.axis(c, 0).unwrap();
        let x = s.axis(c, 1).unwrap();
        let (yo, yi) = s.split(c, y, 2).unwrap();
        let (xo, xi) = s.split(c, x, 4).unwrap();
        s.reorder(c, &[yo, xo, yi, xi]).unwrap();
        assert_eq!(s.leaf_names(c), vec!["y.outer", "x.outer", "y.inner", "x.inner", "k"]);

        let fused = s.fuse(c, yo, xo).unwrap();
        assert_eq!(s.iter_var(fused).extent, DimExtent::Known(4));
        assert_eq!(s.leaf_names(c)[0], "y.outer.x.outer.fused");

        let err = s.fuse(c, yi, fused).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidFuse { .. }));
    }

    #[test]
    fn test_fuse_rejects_mixed_kinds() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let x = s.axis(c, 1).unwrap();
        let k = s.reduce_axis(c, 0).unwrap();
        assert!(matches!(s.fuse(c, x, k), Err(ScheduleError::InvalidFuse { .. })));
    }

    #[test]
    fn test_single_parallel_per_stage() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let y = s.axis(c, 0).unwrap();
        let x = s.axis(c, 1).unwrap();
        let k = s.reduce_axis(c, 0).unwrap();
        s.parallel(c, y).unwrap();
        assert!(matches!(s.parallel(c, x), Err(ScheduleError::MultipleParallel { .. })));
        assert!(matches!(s.vectorize(c, y), Err(ScheduleError::ConflictingAnnotation { .. })));
        assert!(matches!(s.parallel(c, k), Err(ScheduleError::ParallelReduce { .. })));
        s.parallel(c, y).unwrap_err();
    }

    #[test]
    fn test_cache_write_moves_reduction() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let cc = s.cache_write(c).unwrap();
        assert_eq!(s.get(cc).name(), "c.global");
        assert_eq!(s.leaf_names(cc), vec!["y", "x", "k"]);
        assert_eq!(s.leaf_names(c), vec!["y", "x"]);
        assert_eq!(s.get(c).reads(), &["c.global".to_string()]);
        let names: Vec<_> = s.stages().map(|(_, st)| st.name().to_string()).collect();
        assert_eq!(names, vec!["c.global", "c"]);
        assert!(matches!(s.cache_write(c), Err(ScheduleError::CacheWriteAfterTransform(_))));
    }

    #[test]
    fn test_compute_at_requires_consumer() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let cc = s.cache_write(c).unwrap();
        let y = s.axis(c, 0).unwrap();
        let y_cc = s.axis(cc, 0).unwrap();
        assert!(matches!(
            s.compute_at(c, cc, y_cc),
            Err(ScheduleError::InvalidComputeAt { .. })
        ));
        s.compute_at(cc, c, y).unwrap();
        assert_eq!(s.get(cc).attach(), AttachPoint::At { consumer: c, axis: y });
        // The attach loop can no longer be split out from under the producer.
        assert!(s.split(c, y, 2).is_err());
    }

    #[test]
    fn test_nested_parallel_rejected() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let cc = s.cache_write(c).unwrap();
        let y = s.axis(c, 0).unwrap();
        let x = s.axis(c, 1).unwrap();
        s.parallel(c, y).unwrap();
        s.compute_at(cc, c, x).unwrap();
        let y_cc = s.axis(cc, 0).unwrap();
        assert!(matches!(s.parallel(cc, y_cc), Err(ScheduleError::NestedParallel { .. })));
        s.validate().unwrap();
    }

    #[test]
    fn test_parallel_over_attached_parallel_rejected() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let cc = s.cache_write(c).unwrap();
        let y_cc = s.axis(cc, 0).unwrap();
        s.parallel(cc, y_cc).unwrap();
        let x = s.axis(c, 1).unwrap();
        s.compute_at(cc, c, x).unwrap();
        let y = s.axis(c, 0).unwrap();
        assert!(matches!(s.parallel(c, y), Err(ScheduleError::NestedParallel { .. })));
    }

    #[test]
    fn test_render_places_producer_inside_attach_loop() {
        let (mut s, c) = matmul_schedule(4, 8, 16);
        let cc = s.cache_write(c).unwrap();
        let y = s.axis(c, 0).unwrap();
        s.parallel(c, y).unwrap();
        s.compute_at(cc, c, y).unwrap();
        let text = s.render();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "parallel y in 0..4");
        let cache_store = lines.iter().position(|l| l.trim() == "c.global = ...").unwrap();
        let final_store = lines.iter().position(|l| l.trim() == "c = ...").unwrap();
        assert!(cache_store < final_store);
        assert!(lines[cache_store].starts_with("  "));
    }
}
