use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::attrs::Attrs;
use crate::errors::InferError;
use crate::infer_shapes::{run_rule, InferShapes};
use crate::ops::{
    AddN, BatchMatMul, BiasAddGrad, BinaryOp, Cast, Concat, Conv, Expand, FakeQuantWithMinMaxArgs,
    Gather, GlobalAvgPool, KLDiv, MatMul, MatrixDiag, Pool, PoolKind, Reduce, Reshape, Select,
    SquareSumV2, Squeeze, Tile, TopK, Transpose, UnaryOp, Unsqueeze,
};
use crate::tensor_desc::TensorDesc;

/// Registry of shape inference rules, keyed by operator kind.
///
/// New registries have no operators registered by default. To create a
/// registry with all built-in operators pre-registered, use
/// [`OpRegistry::with_all_ops`]. Additional rules can be added with
/// [`register`](OpRegistry::register) until the registry is sealed. A
/// registry is sealed explicitly with [`seal`](OpRegistry::seal) or
/// implicitly by the first call to [`infer`](OpRegistry::infer).
pub struct OpRegistry {
    rules: FxHashMap<String, Arc<dyn InferShapes>>,
    sealed: AtomicBool,
}

impl OpRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        OpRegistry {
            rules: FxHashMap::default(),
            sealed: AtomicBool::new(false),
        }
    }

    /// Register the shape inference rule for an operator kind.
    pub fn register<R: InferShapes + 'static>(
        &mut self,
        kind: &str,
        rule: R,
    ) -> Result<(), InferError> {
        if self.is_sealed() {
            return Err(InferError::RegistrySealed(kind.to_string()));
        }
        if self.rules.contains_key(kind) {
            return Err(InferError::DuplicateRegistration(kind.to_string()));
        }
        self.rules.insert(kind.to_string(), Arc::new(rule));
        Ok(())
    }

    /// Return the rule registered for `kind`.
    pub fn lookup(&self, kind: &str) -> Result<&dyn InferShapes, InferError> {
        self.rules
            .get(kind)
            .map(|rule| rule.as_ref())
            .ok_or_else(|| InferError::UnknownOperator(kind.to_string()))
    }

    /// Return true if a rule is registered for `kind`.
    pub fn contains(&self, kind: &str) -> bool {
        self.rules.contains_key(kind)
    }

    /// Return the registered operator kinds in an unspecified order.
    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.rules.keys().map(|kind| kind.as_str())
    }

    /// Prevent further registrations.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Validate `attrs` and infer the outputs of an operator of type `kind`.
    ///
    /// This seals the registry.
    pub fn infer(
        &self,
        kind: &str,
        inputs: &[TensorDesc],
        attrs: &Attrs,
    ) -> Result<Vec<TensorDesc>, InferError> {
        self.seal();
        run_rule(self.lookup(kind)?, inputs, attrs)
    }

    /// Create a new registry with all built-in operators registered.
    pub fn with_all_ops() -> Self {
        let mut reg = OpRegistry::new();

        macro_rules! register_op {
            ($kind:literal, $rule:expr) => {
                reg.insert($kind, $rule)
            };
        }

        register_op!("Add", BinaryOp::arithmetic().with_fold(i64::checked_add));
        register_op!("Sub", BinaryOp::arithmetic().with_fold(i64::checked_sub));
        register_op!("Mul", BinaryOp::arithmetic().with_fold(i64::checked_mul));
        register_op!("RealDiv", BinaryOp::arithmetic());
        register_op!("Mod", BinaryOp::arithmetic());
        register_op!("FloorMod", BinaryOp::arithmetic());
        register_op!(
            "Maximum",
            BinaryOp::arithmetic().with_fold(|a, b| Some(a.max(b)))
        );
        register_op!(
            "Minimum",
            BinaryOp::arithmetic().with_fold(|a, b| Some(a.min(b)))
        );
        register_op!("Pow", BinaryOp::arithmetic());
        register_op!("BitwiseAnd", BinaryOp::bitwise());
        register_op!("BitwiseOr", BinaryOp::bitwise());
        register_op!("BitwiseXor", BinaryOp::bitwise());
        register_op!("Equal", BinaryOp::comparison());
        register_op!("NotEqual", BinaryOp::comparison());
        register_op!("Greater", BinaryOp::comparison());
        register_op!("GreaterEqual", BinaryOp::comparison());
        register_op!("Less", BinaryOp::comparison());
        register_op!("LessEqual", BinaryOp::comparison());
        register_op!("LogicalAnd", BinaryOp::logical());
        register_op!("LogicalOr", BinaryOp::logical());
        register_op!("Select", Select);
        register_op!("AddN", AddN);

        register_op!("Conv2D", Conv::conv_2d());
        register_op!("Conv3D", Conv::conv_3d());
        register_op!("MaxPool", Pool::pool_2d(PoolKind::Max));
        register_op!("MaxPool3D", Pool::pool_3d(PoolKind::Max));
        register_op!("AvgPool", Pool::pool_2d(PoolKind::Avg));
        register_op!("AvgPool3D", Pool::pool_3d(PoolKind::Avg));
        register_op!("GlobalAvgPool", GlobalAvgPool);
        register_op!("BiasAddGrad", BiasAddGrad);

        register_op!("GatherV2", Gather::v2());
        register_op!("Gather", Gather::with_axis_attr());
        register_op!("Tile", Tile::from_input());
        register_op!("TileD", Tile::from_attr());
        register_op!("Transpose", Transpose::from_input());
        register_op!("TransposeD", Transpose::from_attr());
        register_op!("Expand", Expand);
        register_op!("Reshape", Reshape);
        register_op!("ConcatD", Concat::with_axis_attr());
        register_op!("ConcatV2", Concat::v2());
        register_op!("Squeeze", Squeeze);
        register_op!("Unsqueeze", Unsqueeze);
        register_op!("MatrixDiag", MatrixDiag);
        register_op!("TopK", TopK);

        register_op!("ReduceSum", Reduce::from_input());
        register_op!("ReduceMean", Reduce::from_input());
        register_op!("ReduceMax", Reduce::from_input());
        register_op!("ReduceMin", Reduce::from_input());
        register_op!("ReduceProd", Reduce::from_input());
        register_op!("ReduceSumD", Reduce::from_attr());
        register_op!("ReduceMeanD", Reduce::from_attr());
        register_op!("ReduceMaxD", Reduce::from_attr());
        register_op!("ReduceMinD", Reduce::from_attr());
        register_op!("SquareSumV2", SquareSumV2);
        register_op!("KLDiv", KLDiv);

        register_op!("Relu", UnaryOp::new());
        register_op!("Abs", UnaryOp::new());
        register_op!("Neg", UnaryOp::new());
        register_op!("Exp", UnaryOp::float_only());
        register_op!("Sqrt", UnaryOp::float_only());
        register_op!("Identity", UnaryOp::identity());
        register_op!("Cast", Cast);
        register_op!("FakeQuantWithMinMaxArgs", FakeQuantWithMinMaxArgs);
        register_op!("MatMul", MatMul);
        register_op!("BatchMatMulV2", BatchMatMul);

        reg
    }

    /// Return a shared, sealed registry containing the built-in operators.
    pub fn global() -> &'static OpRegistry {
        static GLOBAL: OnceLock<OpRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let reg = OpRegistry::with_all_ops();
            reg.seal();
            reg
        })
    }

    /// Add a built-in rule. Built-in kinds are unique so this cannot fail.
    fn insert<R: InferShapes + 'static>(&mut self, kind: &'static str, rule: R) {
        self.rules.insert(kind.to_string(), Arc::new(rule));
    }
}

impl Default for OpRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::OpRegistry;
    use crate::attrs::Attrs;
    use crate::dtype::DataType;
    use crate::errors::{ErrorKind, InferError};
    use crate::tensor_desc::TensorDesc;

    fn passthrough(inputs: &[TensorDesc], _attrs: &Attrs) -> Result<Vec<TensorDesc>, InferError> {
        Ok(inputs.to_vec())
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = OpRegistry::new();
        assert_eq!(
            reg.lookup("Custom").err().map(|e| e.kind()),
            Some(ErrorKind::UnknownOperator)
        );

        reg.register("Custom", passthrough).unwrap();
        assert!(reg.contains("Custom"));
        assert!(reg.lookup("Custom").is_ok());

        let err = reg.register("Custom", passthrough).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::DuplicateRegistration);
    }

    #[test]
    fn test_infer_seals_registry() {
        let mut reg = OpRegistry::new();
        reg.register("Custom", passthrough).unwrap();
        assert!(!reg.is_sealed());

        let input = TensorDesc::from_dims(&[2, 3], DataType::Float32);
        let outputs = reg.infer("Custom", &[input.clone()], &Attrs::new()).unwrap();
        assert_eq!(outputs, [input]);
        assert!(reg.is_sealed());

        let err = reg.register("Other", passthrough).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::RegistrySealed);
    }

    #[test]
    fn test_failed_infer_seals_registry() {
        let mut reg = OpRegistry::new();
        let err = reg.infer("Missing", &[], &Attrs::new()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::UnknownOperator);
        assert!(reg.is_sealed());
        assert!(reg.register("Missing", passthrough).is_err());
    }

    #[test]
    fn test_with_all_ops() {
        let reg = OpRegistry::with_all_ops();
        for kind in [
            "Add",
            "LogicalOr",
            "Select",
            "AddN",
            "Conv2D",
            "MaxPool3D",
            "BiasAddGrad",
            "GatherV2",
            "TileD",
            "TransposeD",
            "ConcatV2",
            "TopK",
            "ReduceSum",
            "ReduceMinD",
            "SquareSumV2",
            "KLDiv",
            "Identity",
            "FakeQuantWithMinMaxArgs",
            "BatchMatMulV2",
        ] {
            assert!(reg.contains(kind), "{} is not registered", kind);
        }

        let mut kinds: Vec<&str> = reg.kinds().collect();
        kinds.sort_unstable();
        let count = kinds.len();
        kinds.dedup();
        assert_eq!(kinds.len(), count);
        assert!(kinds.binary_search(&"Conv3D").is_ok());
        assert!(kinds.binary_search(&"BatchMatMulV2").is_ok());
        for kind in kinds {
            assert!(reg.lookup(kind).is_ok());
        }
        assert!(!reg.is_sealed());
    }

    #[test]
    fn test_global_registry() {
        let reg = OpRegistry::global();
        assert!(reg.is_sealed());
        assert!(std::ptr::eq(reg, OpRegistry::global()));

        let a = TensorDesc::from_dims(&[4, 1], DataType::Int32);
        let b = TensorDesc::from_dims(&[3], DataType::Int32);
        let outputs = reg.infer("Add", &[a, b], &Attrs::new()).unwrap();
        assert_eq!(outputs[0].shape().to_i64s(), [4, 3]);
    }

    #[test]
    fn test_add_folds_constants() {
        let reg = OpRegistry::global();
        let a = TensorDesc::from_const_vec(vec![2, 3], DataType::Int64);
        let b = TensorDesc::from_const_scalar(4, DataType::Int64);
        let outputs = reg.infer("Mul", &[a, b], &Attrs::new()).unwrap();
        assert_eq!(outputs[0].const_value(), Some([8, 12].as_slice()));
    }
}
