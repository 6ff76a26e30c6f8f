use crate::interp::value::{new_obj, Obj, Value};
use crate::jvm::code::ConstValue;
use crate::jvm::model::ClassModel;
use std::collections::HashMap;

/// Initialization progress of a materialized class
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum InitState {
    Uninitialized,
    /// The static initializer is on the call stack right now
    Initializing,
    Ready,
    /// Initialization failed once; it is not retried
    Failed,
}

/// A class materialized inside the sandbox, with its static field storage
pub(crate) struct RuntimeClass {
    pub model: ClassModel,
    pub statics: HashMap<String, Value>,
    pub state: InitState,
}

impl RuntimeClass {
    /// Materialize a model: static fields get their `ConstantValue` or the
    /// type default, exactly like class preparation in a real VM
    pub fn new(model: ClassModel) -> RuntimeClass {
        let mut statics = HashMap::new();
        for field in &model.fields {
            if !field.access_flags.is_static() {
                continue;
            }
            let value = match &field.constant_value {
                Some(ConstValue::Int(v)) => Value::Int(*v),
                Some(ConstValue::Long(v)) => Value::Long(*v),
                Some(ConstValue::Float(v)) => Value::Float(*v),
                Some(ConstValue::Double(v)) => Value::Double(*v),
                Some(ConstValue::Str(s)) => Value::Ref(new_obj(Obj::Str(s.clone()))),
                _ => Value::default_for_descriptor(&field.descriptor),
            };
            statics.insert(field.name.clone(), value);
        }
        RuntimeClass {
            model,
            statics,
            state: InitState::Uninitialized,
        }
    }
}
