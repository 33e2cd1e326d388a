use opshape::shape::{Dim, DimRange, RangedDim};
use opshape::shape_expr::{
    broadcast_shapes, conv_output_dim, conv_output_size, same_padding, tile_shape, Window,
};
use opshape::{Attrs, DataType, OpRegistry, TensorDesc};
use proptest::prelude::*;

/// Dimension which is either a small fixed size or unknown with no range.
fn dim() -> impl Strategy<Value = RangedDim> {
    prop_oneof![
        3 => (1usize..5).prop_map(RangedDim::fixed),
        1 => Just(RangedDim::unknown()),
    ]
}

fn shape() -> impl Strategy<Value = Vec<RangedDim>> {
    prop::collection::vec(dim(), 0..5)
}

/// Dimension which may carry a bounded range.
fn ranged_dim() -> impl Strategy<Value = RangedDim> {
    prop_oneof![
        (1usize..5).prop_map(RangedDim::fixed),
        (1usize..5, 0usize..5).prop_map(|(min, extra)| {
            RangedDim::dynamic(DimRange::new(min, min + extra))
        }),
        Just(RangedDim::unknown()),
    ]
}

fn window() -> impl Strategy<Value = Window> {
    (1usize..6, 1usize..4, 1usize..3, 0usize..3, 0usize..3, any::<bool>()).prop_map(
        |(kernel, stride, dilation, pad_before, pad_after, ceil_mode)| {
            Window::new(kernel, stride)
                .with_dilation(dilation)
                .with_padding(pad_before, pad_after)
                .with_ceil_mode(ceil_mode)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn prop_broadcast_is_commutative(
        a in prop::collection::vec(ranged_dim(), 0..5),
        b in prop::collection::vec(ranged_dim(), 0..5),
    ) {
        let ab = broadcast_shapes(&a, &b).ok();
        let ba = broadcast_shapes(&b, &a).ok();
        prop_assert_eq!(ab, ba);
    }

    #[test]
    fn prop_broadcast_is_associative(a in shape(), b in shape(), c in shape()) {
        let left = broadcast_shapes(&a, &b).and_then(|ab| broadcast_shapes(&ab, &c)).ok();
        let right = broadcast_shapes(&b, &c).and_then(|bc| broadcast_shapes(&a, &bc)).ok();
        prop_assert_eq!(left, right);
    }

    #[test]
    fn prop_broadcast_range_contains_runtime_size(a in ranged_dim(), b in ranged_dim()) {
        let Ok(out) = broadcast_shapes(&[a], &[b]) else {
            return Ok(());
        };
        let out = out[0];
        let a_max = a.range.max.unwrap_or(8);
        let b_max = b.range.max.unwrap_or(8);
        for x in a.range.min..=a_max {
            for y in b.range.min..=b_max {
                let size = match (x, y) {
                    (x, y) if x == y => x,
                    (1, y) => y,
                    (x, 1) => x,
                    _ => continue,
                };
                prop_assert!(out.range.contains(size), "{} not in {}", size, out.range);
            }
        }
    }

    #[test]
    fn prop_conv_output_size_is_monotonic(input in 0usize..64, extra in 0usize..64, window in window()) {
        let small = conv_output_size(input, &window);
        let large = conv_output_size(input + extra, &window);
        if let Ok(small) = small {
            prop_assert!(large.is_ok());
            prop_assert!(small <= large.unwrap());
        }
    }

    #[test]
    fn prop_conv_output_range_bounds_sizes(min in 1usize..32, extra in 0usize..32, window in window()) {
        let dim = RangedDim::dynamic(DimRange::new(min, min + extra));
        let Ok(out) = conv_output_dim(&dim, &window) else {
            return Ok(());
        };
        for size in min..=min + extra {
            if let Ok(out_size) = conv_output_size(size, &window) {
                prop_assert!(out.range.contains(out_size));
            }
        }
    }

    #[test]
    fn prop_same_padding_round_trip(
        input in 1usize..128,
        kernel in 1usize..8,
        stride in 1usize..5,
        dilation in 1usize..3,
    ) {
        let (before, after) = same_padding(input, kernel, stride, dilation).unwrap();
        let window = Window::new(kernel, stride)
            .with_dilation(dilation)
            .with_padding(before, after);
        prop_assert_eq!(conv_output_size(input, &window).unwrap(), input.div_ceil(stride));
        prop_assert!(after >= before && after - before <= 1);
    }

    #[test]
    fn prop_tile_preserves_known_dims(
        input in shape(),
        extra in prop::collection::vec(1i64..4, 0..3),
        seed in prop::collection::vec(1i64..4, 5),
    ) {
        let mut multiples = extra.clone();
        multiples.extend(&seed[..input.len()]);

        let out = tile_shape(&input, &multiples).unwrap();
        prop_assert_eq!(out.len(), multiples.len());

        let padded = std::iter::repeat_n(RangedDim::fixed(1), extra.len()).chain(input.iter().copied());
        for ((in_dim, out_dim), &m) in padded.zip(&out).zip(&multiples) {
            match in_dim.dim {
                Dim::Fixed(size) => {
                    prop_assert_eq!(out_dim.dim, Dim::Fixed(size * m as usize));
                }
                Dim::Unknown => {
                    prop_assert_eq!(out_dim.dim, Dim::Unknown);
                }
            }
        }
    }

    #[test]
    fn prop_inference_is_idempotent(a in shape(), b in shape()) {
        let to_desc = |dims: &[RangedDim]| TensorDesc::from_ranged_dims(dims, DataType::Float32, false);
        let inputs = [to_desc(&a), to_desc(&b)];
        let registry = OpRegistry::global();

        let first = registry.infer("Add", &inputs, &Attrs::new());
        let second = registry.infer("Add", &inputs, &Attrs::new());
        prop_assert_eq!(&first, &second);

        if let Ok(outputs) = first {
            let relu = registry.infer("Relu", &outputs, &Attrs::new()).unwrap();
            prop_assert_eq!(&relu, &outputs);
            let relu_again = registry.infer("Relu", &relu, &Attrs::new()).unwrap();
            prop_assert_eq!(relu_again, relu);
        }
    }
}

#[cfg(feature = "serde")]
#[test]
fn test_descriptor_serde_round_trip() {
    let desc = TensorDesc::from_i64s(&[-1, 8, 375], DataType::Float32)
        .unwrap()
        .with_value_range(vec![
            DimRange::new(15, 16),
            DimRange::fixed(8),
            DimRange::fixed(375),
        ])
        .unwrap();
    let json = serde_json::to_string(&desc).unwrap();
    let parsed: TensorDesc = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, desc);

    let attrs = Attrs::new()
        .with("strides", [1i64, 2, 2, 1])
        .with("padding", "SAME");
    let json = serde_json::to_string(&attrs).unwrap();
    let parsed: Attrs = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, attrs);
}
