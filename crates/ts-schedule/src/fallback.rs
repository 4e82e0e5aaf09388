use tracing::debug;

use crate::space::{ConfigEntity, ConfigSpace, KnobDecl, KnobValue, SplitEntity};

/// Upper bound on the register-blocked output-width tile.
pub const MAX_REGISTER_TILE: usize = 31;

/// What a knob tiles, inferred from its name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KnobRole {
    Row,
    Column,
    Reduction,
    OutChannel,
    InChannel,
    OutWidth,
    Other,
}

impl KnobRole {
    fn of(name: &str) -> Self {
        match name {
            "tile_y" => KnobRole::Row,
            "tile_x" => KnobRole::Column,
            "tile_k" => KnobRole::Reduction,
            "tile_oc" => KnobRole::OutChannel,
            "tile_ic" => KnobRole::InChannel,
            "tile_ow" => KnobRole::OutWidth,
            _ => KnobRole::Other,
        }
    }
}

/// Deterministic, hardware-aware default configuration for spaces that have
/// no tuning record.
///
/// `generate` is total: every split knob gets a chain of the declared arity
/// whose product is the canonical extent, and every flag gets `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackGenerator {
    lanes: usize,
}

impl FallbackGenerator {
    /// `vector_lanes` is the number of fp32 values per SIMD register. Zero is
    /// treated as one.
    pub fn new(vector_lanes: usize) -> Self {
        FallbackGenerator {
            lanes: vector_lanes.max(1),
        }
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn generate(&self, space: &ConfigSpace) -> ConfigEntity {
        let packed = matches!(
            space.knob("tile_x"),
            Some(KnobDecl::Split { num_outputs: 3, .. })
        );
        let oc_bn = match space.knob("tile_oc") {
            Some(KnobDecl::Split { extent, .. }) => {
                largest_divisor_at_most(extent.heuristic_size(), self.lanes)
            }
            _ => self.lanes,
        };

        let mut entity = ConfigEntity::new();
        for (name, decl) in space.knobs() {
            let (extent, num_outputs) = match decl {
                KnobDecl::Flag => {
                    entity.insert(name, KnobValue::Flag(false));
                    continue;
                }
                KnobDecl::Split { extent, num_outputs } => (extent, *num_outputs),
            };
            let size = extent.heuristic_size();
            if extent.is_symbolic() {
                debug!(knob = name, canonical = size, "symbolic extent canonicalized for fallback");
            }
            let factors = match KnobRole::of(name) {
                KnobRole::Column if packed => packed_column(size, self.lanes),
                KnobRole::Column => vec![size, 1],
                KnobRole::Row if packed => packed_row(size),
                KnobRole::Row => vec![1, size],
                KnobRole::Reduction if packed => vec![size, 1],
                KnobRole::Reduction => inner_block(size, self.lanes),
                KnobRole::OutChannel => inner_block(size, self.lanes),
                KnobRole::InChannel => inner_block(size, oc_bn),
                KnobRole::OutWidth => inner_block(size, MAX_REGISTER_TILE),
                KnobRole::Other => vec![size],
            };
            let factors = fit_arity(factors, num_outputs);
            debug!(knob = name, ?factors, "fallback split");
            entity.insert(name, KnobValue::Split(SplitEntity::new(factors)));
        }
        entity
    }
}

/// Largest divisor of `n` that does not exceed `limit`, at least 1.
fn largest_divisor_at_most(n: usize, limit: usize) -> usize {
    (1..=limit.min(n)).rev().find(|d| n % d == 0).unwrap_or(1)
}

/// `[n / bn, bn]` with `bn` the largest divisor of `n` not above `limit`.
fn inner_block(n: usize, limit: usize) -> Vec<usize> {
    let bn = largest_divisor_at_most(n, limit);
    vec![n / bn, bn]
}

/// Double the middle factor while more than four outer tiles remain and the
/// tile count stays even.
fn outer_sub_factor(tiles: usize) -> usize {
    let mut oi = 1;
    while tiles / oi > 4 {
        if (tiles / oi) % 2 == 1 {
            break;
        }
        oi *= 2;
    }
    oi
}

/// Column chain for the packed template. The inner factor is the largest
/// divisor up to two vector registers wide, except that a column exactly two
/// registers wide is split into two one-register tiles.
fn packed_column(n: usize, lanes: usize) -> Vec<usize> {
    let limit = lanes.saturating_mul(2);
    let inner = (1..=limit.min(n))
        .rev()
        .find(|&d| n % d == 0 && !(d == n && n == limit))
        .unwrap_or(1);
    let tiles = n / inner;
    let oi = outer_sub_factor(tiles);
    vec![tiles / oi, oi, inner]
}

fn packed_row(m: usize) -> Vec<usize> {
    let mut inner = 8;
    while m % inner != 0 {
        inner /= 2;
    }
    let tiles = m / inner;
    let oi = outer_sub_factor(tiles);
    vec![tiles / oi, oi, inner]
}

/// Reshape a heuristic chain to `arity` factors without changing its
/// product: surplus leading factors are merged into the outermost, and
/// missing ones are filled with 1 right after it.
fn fit_arity(mut factors: Vec<usize>, arity: usize) -> Vec<usize> {
    while factors.len() > arity.max(1) {
        let head = factors.remove(0);
        factors[0] *= head;
    }
    while factors.len() < arity {
        factors.insert(1, 1);
    }
    factors
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use ts_ir::DimExtent;

    fn dense_space(m: DimExtent, n: DimExtent, k: DimExtent, packed: bool) -> ConfigSpace {
        let arity = if packed { 3 } else { 2 };
        let mut space = ConfigSpace::new();
        space.declare_split("tile_y", m, arity).unwrap();
        space.declare_split("tile_x", n, arity).unwrap();
        space.declare_split("tile_k", k, 2).unwrap();
        space
    }

    fn sizes(entity: &ConfigEntity, knob: &str) -> Vec<usize> {
        entity.split(knob).unwrap().size.clone()
    }

    #[test]
    fn test_packed_matmul_16() {
        let k16 = DimExtent::Known(16);
        let entity = FallbackGenerator::new(8).generate(&dense_space(k16, k16, k16, true));
        assert_eq!(sizes(&entity, "tile_x"), vec![2, 1, 8]);
        assert_eq!(sizes(&entity, "tile_y"), vec![2, 1, 8]);
        assert_eq!(sizes(&entity, "tile_k"), vec![16, 1]);
    }

    #[test]
    fn test_packed_column_between_one_and_two_registers() {
        let k16 = DimExtent::Known(16);
        let entity = FallbackGenerator::new(8).generate(&dense_space(k16, DimExtent::Known(12), k16, true));
        assert_eq!(sizes(&entity, "tile_x"), vec![1, 1, 12]);
        let entity = FallbackGenerator::new(8).generate(&dense_space(k16, DimExtent::Known(24), k16, true));
        assert_eq!(sizes(&entity, "tile_x"), vec![2, 1, 12]);
        let entity = FallbackGenerator::new(4).generate(&dense_space(k16, DimExtent::Known(8), k16, true));
        assert_eq!(sizes(&entity, "tile_x"), vec![2, 1, 4]);
    }

    #[test]
    fn test_packed_large_column() {
        let entity = FallbackGenerator::new(8).generate(&dense_space(
            DimExtent::Known(256),
            DimExtent::Known(1024),
            DimExtent::Known(512),
            true,
        ));
        // 1024 / 16 = 64 tiles, doubled down to 4 outer tiles
        assert_eq!(sizes(&entity, "tile_x"), vec![4, 16, 16]);
        assert_eq!(sizes(&entity, "tile_y"), vec![4, 8, 8]);
    }

    #[test]
    fn test_packed_odd_tiles_stop_doubling() {
        let entity = FallbackGenerator::new(4).generate(&dense_space(
            DimExtent::Known(24),
            DimExtent::Known(56),
            DimExtent::Known(8),
            true,
        ));
        // 56 / 8 = 7 tiles, odd, so no outer sub-split
        assert_eq!(sizes(&entity, "tile_x"), vec![7, 1, 8]);
        // 24 / 8 = 3 row tiles
        assert_eq!(sizes(&entity, "tile_y"), vec![3, 1, 8]);
    }

    #[test]
    fn test_unpacked_matmul() {
        let entity = FallbackGenerator::new(8).generate(&dense_space(
            DimExtent::Known(4),
            DimExtent::Known(32),
            DimExtent::Known(36),
            false,
        ));
        assert_eq!(sizes(&entity, "tile_k"), vec![6, 6]);
        assert_eq!(sizes(&entity, "tile_x"), vec![32, 1]);
        assert_eq!(sizes(&entity, "tile_y"), vec![1, 4]);
    }

    #[test]
    fn test_symbolic_extent_uses_canonical_size() {
        let entity = FallbackGenerator::new(8).generate(&dense_space(
            DimExtent::Symbolic,
            DimExtent::Known(16),
            DimExtent::Known(16),
            true,
        ));
        assert_eq!(sizes(&entity, "tile_y").iter().product::<usize>(), 16);
    }

    #[test]
    fn test_conv_knobs() {
        let mut space = ConfigSpace::new();
        space.declare_split("tile_ic", DimExtent::Known(12), 2).unwrap();
        space.declare_split("tile_oc", DimExtent::Known(24), 2).unwrap();
        space.declare_split("tile_ow", DimExtent::Known(56), 2).unwrap();
        space.declare_flag("unroll_kw").unwrap();
        let entity = FallbackGenerator::new(16).generate(&space);
        assert_eq!(sizes(&entity, "tile_oc"), vec![2, 12]);
        assert_eq!(sizes(&entity, "tile_ic"), vec![1, 12]);
        assert_eq!(sizes(&entity, "tile_ow"), vec![2, 28]);
        assert!(!entity.flag("unroll_kw").unwrap());
    }

    #[test]
    fn test_fit_arity() {
        assert_eq!(fit_arity(vec![2, 1, 8], 2), vec![2, 8]);
        assert_eq!(fit_arity(vec![6, 6], 4), vec![6, 1, 1, 6]);
        assert_eq!(fit_arity(vec![7], 1), vec![7]);
        assert_eq!(fit_arity(vec![3, 5], 1), vec![15]);
    }

    #[test]
    fn test_products_hold_over_grid() {
        let extents = [1, 7, 8, 16, 33, 128];
        for &lanes in &[4, 8, 16] {
            let generator = FallbackGenerator::new(lanes);
            for &m in &extents {
                for &n in &extents {
                    for &k in &extents {
                        for packed in [true, false] {
                            let space = dense_space(
                                DimExtent::Known(m),
                                DimExtent::Known(n),
                                DimExtent::Known(k),
                                packed,
                            );
                            let entity = generator.generate(&space);
                            entity.validate(&space).unwrap();
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_random_spaces_always_valid() {
        let names = ["tile_y", "tile_x", "tile_k", "tile_oc", "tile_ic", "tile_ow", "other"];
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let mut space = ConfigSpace::new();
            for name in names {
                if rng.gen_bool(0.7) {
                    let extent = if rng.gen_bool(0.1) {
                        DimExtent::Symbolic
                    } else {
                        DimExtent::Known(rng.gen_range(1..=512))
                    };
                    space.declare_split(name, extent, rng.gen_range(1..=4)).unwrap();
                }
            }
            let lanes = rng.gen_range(0..=32);
            let entity = FallbackGenerator::new(lanes).generate(&space);
            entity.validate(&space).unwrap();
            assert_eq!(FallbackGenerator::new(lanes).generate(&space), entity);
        }
    }
}
