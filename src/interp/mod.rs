//! Sandboxed bytecode interpreter
//!
//! An owned, explicit evaluator over the [`Instruction`] alphabet. It exists
//! to run fragments of the *untrusted* program - reduced static initializers
//! and their helper routines - and recover the values they conceal, without
//! ever giving that code a host capability. There is no classloading, no
//! reflection, no filesystem, no network: the only classes that exist are
//! the ones the resolver callback supplies from the live class table, and
//! the only library routines are a small whitelisted intrinsic set.
//!
//! Three boundaries keep adversarial input contained:
//!
//!   - the **intrinsic whitelist**: any call that is neither resolvable nor
//!     whitelisted fails the current invocation;
//!   - the **capability token**: reading non-public static fields or calling
//!     non-public methods across classes requires a token that is only valid
//!     while its [`CapabilityScope`] is alive, and the scope revokes it on
//!     every exit path, including unwinding;
//!   - the **deadline and fuel budget**: every invocation is bounded in both
//!     wall-clock time and instruction count, checked inside the dispatch
//!     loop, so a hostile loop fails one decrypt site instead of hanging the
//!     pass.

mod class;
mod error;
mod intrinsics;
mod value;

pub use error::SandboxError;
pub use value::{new_obj, CipherState, Obj, ObjRef, Value};

use crate::jvm::code::{
    ArithOp, ArrayKind, BranchOp, CmpOp, ConstValue, ConvOp, FieldAccess, FieldRef, Instruction,
    InvokeKind, Label, LocalKind, MethodRef, OrdComparison, StackOp, TypeOp,
};
use crate::jvm::model::{ClassModel, MethodModel};
use crate::jvm::{MethodDescriptor, ParseDescriptor};
use class::{InitState, RuntimeClass};
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Bounds on a single interpreter invocation
#[derive(Copy, Clone, Debug)]
pub struct InterpLimits {
    /// Wall-clock budget per invocation
    pub deadline: Duration,
    /// Instruction budget per invocation
    pub fuel: u64,
    /// Maximum interpreted call depth
    pub max_call_depth: usize,
}

impl Default for InterpLimits {
    fn default() -> InterpLimits {
        InterpLimits {
            deadline: Duration::from_secs(5),
            fuel: 4_000_000,
            max_call_depth: 128,
        }
    }
}

/// Callback used to materialize classes the interpreter has not seen yet
///
/// Implementations look the name up in the live class table, so that an
/// already partially-transformed class is what executes - never the original
/// archive bytes.
pub trait ClassResolver {
    fn resolve(&self, name: &str) -> Option<ClassModel>;
}

impl<F> ClassResolver for F
where
    F: Fn(&str) -> Option<ClassModel>,
{
    fn resolve(&self, name: &str) -> Option<ClassModel> {
        self(name)
    }
}

/// RAII grant of sandbox privileges
///
/// While the scope is alive, tokens issued from it permit reading non-public
/// static fields and invoking non-public methods inside the sandbox. Dropping
/// the scope revokes every token, on success, error, and unwind alike.
pub struct CapabilityScope {
    active: Rc<Cell<bool>>,
}

impl CapabilityScope {
    pub fn grant() -> CapabilityScope {
        CapabilityScope {
            active: Rc::new(Cell::new(true)),
        }
    }

    /// Issue a token tied to this scope's lifetime
    pub fn token(&self) -> CapabilityToken {
        CapabilityToken {
            active: Rc::clone(&self.active),
        }
    }
}

impl Drop for CapabilityScope {
    fn drop(&mut self) {
        self.active.set(false);
    }
}

/// Handle gating privileged operations; dead once its scope is dropped
#[derive(Clone)]
pub struct CapabilityToken {
    active: Rc<Cell<bool>>,
}

impl CapabilityToken {
    pub fn is_active(&self) -> bool {
        self.active.get()
    }
}

/// The sandboxed interpreter
pub struct Interpreter<'r> {
    resolver: &'r dyn ClassResolver,
    limits: InterpLimits,
    classes: HashMap<String, RuntimeClass>,
    deadline: Option<Instant>,
    fuel: u64,
}

impl<'r> Interpreter<'r> {
    pub fn new(resolver: &'r dyn ClassResolver, limits: InterpLimits) -> Interpreter<'r> {
        Interpreter {
            resolver,
            limits,
            classes: HashMap::new(),
            deadline: None,
            fuel: 0,
        }
    }

    /// Materialize a class the caller already holds (typically a reduced
    /// copy) and run its static initializer
    pub fn preload(
        &mut self,
        model: ClassModel,
        token: &CapabilityToken,
    ) -> Result<(), SandboxError> {
        self.begin_invocation();
        let name = model.name.clone();
        self.classes.insert(name.clone(), RuntimeClass::new(model));
        self.ensure_initialized(&name, token)
    }

    /// Read the current runtime value of a static field
    pub fn read_static(
        &mut self,
        class_name: &str,
        field_name: &str,
        token: &CapabilityToken,
    ) -> Result<Value, SandboxError> {
        self.begin_invocation();
        self.ensure_initialized(class_name, token)?;
        let runtime = self.classes.get(class_name).expect("initialized class");
        let field = runtime.model.field(field_name).ok_or_else(|| {
            SandboxError::MissingField {
                owner: class_name.to_owned(),
                name: field_name.to_owned(),
            }
        })?;
        if !field.access_flags.is_public() && !token.is_active() {
            return Err(SandboxError::IllegalAccess {
                owner: class_name.to_owned(),
                member: field_name.to_owned(),
            });
        }
        runtime
            .statics
            .get(field_name)
            .cloned()
            .ok_or_else(|| SandboxError::MissingField {
                owner: class_name.to_owned(),
                name: field_name.to_owned(),
            })
    }

    /// Invoke one static method of a materialized class
    pub fn invoke_static(
        &mut self,
        class_name: &str,
        method_name: &str,
        descriptor: &str,
        args: Vec<Value>,
        token: &CapabilityToken,
    ) -> Result<Option<Value>, SandboxError> {
        self.begin_invocation();
        self.ensure_initialized(class_name, token)?;
        let runtime = self.classes.get(class_name).expect("initialized class");
        let method = runtime
            .model
            .method(method_name, descriptor)
            .cloned()
            .ok_or_else(|| SandboxError::MissingMethod {
                owner: class_name.to_owned(),
                name: method_name.to_owned(),
                descriptor: descriptor.to_owned(),
            })?;
        if !method.access_flags.is_public() && !token.is_active() {
            return Err(SandboxError::IllegalAccess {
                owner: class_name.to_owned(),
                member: method_name.to_owned(),
            });
        }
        self.execute(class_name, &method, args, token, 0)
    }

    /// Arm the deadline and refill the fuel tank for one invocation
    fn begin_invocation(&mut self) {
        self.deadline = Some(Instant::now() + self.limits.deadline);
        self.fuel = self.limits.fuel;
    }

    fn consume_fuel(&mut self) -> Result<(), SandboxError> {
        if self.fuel == 0 {
            return Err(SandboxError::FuelExhausted);
        }
        self.fuel -= 1;
        // An Instant read per instruction would dominate the loop
        if self.fuel % 1024 == 0 {
            if let Some(deadline) = self.deadline {
                if Instant::now() >= deadline {
                    return Err(SandboxError::DeadlineExpired);
                }
            }
        }
        Ok(())
    }

    /// Materialize a class through the resolver if it is not present yet
    fn ensure_loaded(&mut self, name: &str) -> Result<(), SandboxError> {
        if self.classes.contains_key(name) {
            return Ok(());
        }
        match self.resolver.resolve(name) {
            Some(model) => {
                self.classes.insert(name.to_owned(), RuntimeClass::new(model));
                Ok(())
            }
            None => Err(SandboxError::MissingClass(name.to_owned())),
        }
    }

    /// Run the static initializer on first touch, once
    fn ensure_initialized(
        &mut self,
        name: &str,
        token: &CapabilityToken,
    ) -> Result<(), SandboxError> {
        self.ensure_loaded(name)?;
        let runtime = self.classes.get_mut(name).expect("loaded class");
        match runtime.state {
            InitState::Ready | InitState::Initializing => return Ok(()),
            InitState::Failed => {
                return Err(SandboxError::InitFailure(
                    name.to_owned(),
                    Box::new(SandboxError::Unsupported(
                        "static initialization previously failed",
                    )),
                ))
            }
            InitState::Uninitialized => (),
        }
        runtime.state = InitState::Initializing;
        let clinit = runtime.model.clinit().cloned();
        let outcome = match clinit {
            None => Ok(None),
            Some(clinit) => self.execute(name, &clinit, vec![], token, 0),
        };
        let runtime = self.classes.get_mut(name).expect("loaded class");
        match outcome {
            Ok(_) => {
                runtime.state = InitState::Ready;
                Ok(())
            }
            Err(cause) => {
                runtime.state = InitState::Failed;
                Err(SandboxError::InitFailure(name.to_owned(), Box::new(cause)))
            }
        }
    }

    /// The dispatch loop: run one method body to completion
    fn execute(
        &mut self,
        owner: &str,
        method: &MethodModel,
        args: Vec<Value>,
        token: &CapabilityToken,
        depth: usize,
    ) -> Result<Option<Value>, SandboxError> {
        if depth > self.limits.max_call_depth {
            return Err(SandboxError::CallDepthExceeded);
        }

        let mut label_positions: HashMap<Label, usize> = HashMap::new();
        for (index, instruction) in method.instructions.iter().enumerate() {
            if let Some(label) = instruction.placed_label() {
                if label_positions.insert(label, index).is_some() {
                    return Err(SandboxError::DuplicateLabel(label));
                }
            }
        }

        let mut locals: Vec<Option<Value>> = vec![];
        let mut slot = 0usize;
        for arg in args {
            let wide = arg.is_wide();
            store_local(&mut locals, slot, arg);
            slot += if wide { 2 } else { 1 };
        }

        let mut stack: Vec<Value> = vec![];
        let mut pc = 0usize;

        loop {
            self.consume_fuel()?;
            let instruction = method
                .instructions
                .get(pc)
                .ok_or(SandboxError::Unsupported("control fell off the method end"))?;

            match instruction {
                Instruction::Label(_) | Instruction::Nop => (),

                Instruction::Const(constant) => stack.push(match constant {
                    ConstValue::Null => Value::Null,
                    ConstValue::Int(v) => Value::Int(*v),
                    ConstValue::Long(v) => Value::Long(*v),
                    ConstValue::Float(v) => Value::Float(*v),
                    ConstValue::Double(v) => Value::Double(*v),
                    ConstValue::Str(s) => Value::string(s.clone()),
                    ConstValue::Class(_) => {
                        return Err(SandboxError::Unsupported("class literal constant"))
                    }
                }),

                Instruction::Load(kind, index) => {
                    let value = locals
                        .get(*index as usize)
                        .and_then(|slot| slot.clone())
                        .ok_or(SandboxError::BadLocal(*index))?;
                    if !kind_matches(*kind, &value) {
                        return Err(SandboxError::TypeConfusion("local of unexpected kind"));
                    }
                    stack.push(value);
                }

                Instruction::Store(kind, index) => {
                    let value = pop(&mut stack)?;
                    if !kind_matches(*kind, &value) {
                        return Err(SandboxError::TypeConfusion("store of unexpected kind"));
                    }
                    store_local(&mut locals, *index as usize, value);
                }

                Instruction::Iinc(index, delta) => {
                    let slot = locals
                        .get_mut(*index as usize)
                        .and_then(|slot| slot.as_mut())
                        .ok_or(SandboxError::BadLocal(*index))?;
                    match slot {
                        Value::Int(v) => *v = v.wrapping_add(*delta as i32),
                        _ => return Err(SandboxError::TypeConfusion("iinc on a non-int local")),
                    }
                }

                Instruction::Stack(op) => run_stack_op(*op, &mut stack)?,

                Instruction::Arith(op) => run_arith_op(*op, &mut stack)?,

                Instruction::Convert(op) => run_conv_op(*op, &mut stack)?,

                Instruction::Compare(op) => run_cmp_op(*op, &mut stack)?,

                Instruction::Field(access, fref) => match access {
                    FieldAccess::GetStatic => {
                        let value = self.get_static(owner, fref, token)?;
                        stack.push(value);
                    }
                    FieldAccess::PutStatic => {
                        let value = pop(&mut stack)?;
                        self.put_static(owner, fref, value, token)?;
                    }
                    FieldAccess::GetField | FieldAccess::PutField => {
                        return Err(SandboxError::Unsupported("instance field access"))
                    }
                },

                Instruction::Invoke(kind, mref) => {
                    let returned = self.invoke(owner, *kind, mref, &mut stack, token, depth)?;
                    if let Some(value) = returned {
                        stack.push(value);
                    }
                }

                Instruction::InvokeDynamic(_) => {
                    return Err(SandboxError::Unsupported("invokedynamic call site"))
                }

                Instruction::Type(op) => match op {
                    TypeOp::New(class_name) => {
                        stack.push(Value::Ref(new_obj(Obj::Blank(class_name.clone()))));
                    }
                    TypeOp::ANewArray(element) => {
                        let count = pop_int(&mut stack)?;
                        let count = array_size(count)?;
                        stack.push(Value::Ref(new_obj(Obj::RefArray {
                            element: element.clone(),
                            values: vec![Value::Null; count],
                        })));
                    }
                    TypeOp::NewArray(base) => {
                        let count = pop_int(&mut stack)?;
                        let count = array_size(count)?;
                        stack.push(Value::Ref(new_obj(new_primitive_array(*base, count))));
                    }
                    TypeOp::CheckCast(_) => (),
                    TypeOp::InstanceOf(class_name) => {
                        let value = pop(&mut stack)?;
                        let result = match &value {
                            Value::Ref(obj) => (obj.borrow().kind_name() == class_name) as i32,
                            _ => 0,
                        };
                        stack.push(Value::Int(result));
                    }
                },

                Instruction::ArrayLoad(kind) => {
                    let index = pop_int(&mut stack)?;
                    let array = pop_obj(&mut stack)?;
                    stack.push(array_load(*kind, &array, index)?);
                }

                Instruction::ArrayStore(kind) => {
                    let value = pop(&mut stack)?;
                    let index = pop_int(&mut stack)?;
                    let array = pop_obj(&mut stack)?;
                    array_store(*kind, &array, index, value)?;
                }

                Instruction::ArrayLength => {
                    let array = pop_obj(&mut stack)?;
                    let length = array
                        .borrow()
                        .array_len()
                        .ok_or(SandboxError::TypeConfusion("arraylength on a non-array"))?;
                    stack.push(Value::Int(length as i32));
                }

                Instruction::Branch(branch) => {
                    let taken = match branch {
                        BranchOp::Goto(_) => true,
                        BranchOp::If(comparison, _) => {
                            let value = pop_int(&mut stack)?;
                            ord_holds(*comparison, value, 0)
                        }
                        BranchOp::IfICmp(comparison, _) => {
                            let rhs = pop_int(&mut stack)?;
                            let lhs = pop_int(&mut stack)?;
                            ord_holds(*comparison, lhs, rhs)
                        }
                        BranchOp::IfACmpEq(_) | BranchOp::IfACmpNe(_) => {
                            let rhs = pop(&mut stack)?;
                            let lhs = pop(&mut stack)?;
                            let same = match (&lhs, &rhs) {
                                (Value::Null, Value::Null) => true,
                                (Value::Ref(a), Value::Ref(b)) => Rc::ptr_eq(a, b),
                                _ => false,
                            };
                            match branch {
                                BranchOp::IfACmpEq(_) => same,
                                _ => !same,
                            }
                        }
                        BranchOp::IfNull(_) => matches!(pop(&mut stack)?, Value::Null),
                        BranchOp::IfNonNull(_) => !matches!(pop(&mut stack)?, Value::Null),
                    };
                    if taken {
                        pc = jump_target(&label_positions, branch.target())?;
                        continue;
                    }
                }

                Instruction::TableSwitch {
                    low,
                    targets,
                    default,
                } => {
                    let value = pop_int(&mut stack)?;
                    let offset = (value as i64) - (*low as i64);
                    let label = if offset >= 0 && (offset as usize) < targets.len() {
                        targets[offset as usize]
                    } else {
                        *default
                    };
                    pc = jump_target(&label_positions, label)?;
                    continue;
                }

                Instruction::LookupSwitch { pairs, default } => {
                    let value = pop_int(&mut stack)?;
                    let label = pairs
                        .iter()
                        .find(|(key, _)| *key == value)
                        .map(|(_, label)| *label)
                        .unwrap_or(*default);
                    pc = jump_target(&label_positions, label)?;
                    continue;
                }

                Instruction::Return(kind) => {
                    return match kind {
                        None => Ok(None),
                        Some(kind) => {
                            let value = pop(&mut stack)?;
                            if !kind_matches(*kind, &value) {
                                return Err(SandboxError::TypeConfusion(
                                    "return of unexpected kind",
                                ));
                            }
                            Ok(Some(value))
                        }
                    }
                }

                Instruction::Throw => {
                    let thrown = pop(&mut stack)?;
                    let what = match &thrown {
                        Value::Ref(obj) => obj.borrow().kind_name().to_owned(),
                        _ => "java/lang/NullPointerException".to_owned(),
                    };
                    return Err(SandboxError::Thrown(what));
                }
            }

            pc += 1;
        }
    }

    fn get_static(
        &mut self,
        from: &str,
        fref: &FieldRef,
        token: &CapabilityToken,
    ) -> Result<Value, SandboxError> {
        self.resolve_static_owner(fref)?;
        self.ensure_initialized(&fref.owner, token)?;
        let runtime = self.classes.get(&fref.owner).expect("initialized class");
        let field = runtime
            .model
            .field(&fref.name)
            .ok_or_else(|| SandboxError::MissingField {
                owner: fref.owner.clone(),
                name: fref.name.clone(),
            })?;
        if !field.access_flags.is_public() && fref.owner != from && !token.is_active() {
            return Err(SandboxError::IllegalAccess {
                owner: fref.owner.clone(),
                member: fref.name.clone(),
            });
        }
        runtime
            .statics
            .get(&fref.name)
            .cloned()
            .ok_or_else(|| SandboxError::MissingField {
                owner: fref.owner.clone(),
                name: fref.name.clone(),
            })
    }

    fn put_static(
        &mut self,
        from: &str,
        fref: &FieldRef,
        value: Value,
        token: &CapabilityToken,
    ) -> Result<(), SandboxError> {
        self.resolve_static_owner(fref)?;
        self.ensure_initialized(&fref.owner, token)?;
        let has_field = {
            let runtime = self.classes.get(&fref.owner).expect("initialized class");
            match runtime.model.field(&fref.name) {
                None => false,
                Some(field) => {
                    if !field.access_flags.is_public() && fref.owner != from && !token.is_active() {
                        return Err(SandboxError::IllegalAccess {
                            owner: fref.owner.clone(),
                            member: fref.name.clone(),
                        });
                    }
                    true
                }
            }
        };
        if !has_field {
            return Err(SandboxError::MissingField {
                owner: fref.owner.clone(),
                name: fref.name.clone(),
            });
        }
        let runtime = self.classes.get_mut(&fref.owner).expect("initialized class");
        runtime.statics.insert(fref.name.clone(), value);
        Ok(())
    }

    /// Fail field access on classes the sandbox will never materialize
    fn resolve_static_owner(&mut self, fref: &FieldRef) -> Result<(), SandboxError> {
        self.ensure_loaded(&fref.owner)
            .map_err(|_| SandboxError::ForbiddenField {
                owner: fref.owner.clone(),
                name: fref.name.clone(),
            })
    }

    fn invoke(
        &mut self,
        from: &str,
        kind: InvokeKind,
        mref: &MethodRef,
        stack: &mut Vec<Value>,
        token: &CapabilityToken,
        depth: usize,
    ) -> Result<Option<Value>, SandboxError> {
        let descriptor = MethodDescriptor::parse(&mref.descriptor)
            .map_err(|_| SandboxError::Unsupported("malformed method descriptor"))?;

        let mut args = Vec::with_capacity(descriptor.parameters.len());
        for _ in 0..descriptor.parameters.len() {
            args.push(pop(stack)?);
        }
        args.reverse();

        let receiver = if kind == InvokeKind::Static {
            None
        } else {
            Some(pop(stack)?)
        };

        // Interpreted dispatch only applies to static calls on resolvable
        // classes; objects of interpreted classes are never instantiated in
        // the sandbox, so instance calls always land in the intrinsics.
        if kind == InvokeKind::Static && self.ensure_loaded(&mref.owner).is_ok() {
            self.ensure_initialized(&mref.owner, token)?;
            let runtime = self.classes.get(&mref.owner).expect("initialized class");
            let target = runtime
                .model
                .method(&mref.name, &mref.descriptor)
                .cloned()
                .ok_or_else(|| SandboxError::MissingMethod {
                    owner: mref.owner.clone(),
                    name: mref.name.clone(),
                    descriptor: mref.descriptor.clone(),
                })?;
            if !target.access_flags.is_public() && mref.owner != from && !token.is_active() {
                return Err(SandboxError::IllegalAccess {
                    owner: mref.owner.clone(),
                    member: mref.name.clone(),
                });
            }
            let owner = mref.owner.clone();
            return self.execute(&owner, &target, args, token, depth + 1);
        }

        intrinsics::invoke(mref, receiver.as_ref(), &args)
    }
}

// ---- free helpers for the dispatch loop ----

fn store_local(locals: &mut Vec<Option<Value>>, index: usize, value: Value) {
    let width = if value.is_wide() { 2 } else { 1 };
    if locals.len() < index + width {
        locals.resize(index + width, None);
    }
    locals[index] = Some(value);
    if width == 2 {
        locals[index + 1] = None;
    }
}

fn kind_matches(kind: LocalKind, value: &Value) -> bool {
    matches!(
        (kind, value),
        (LocalKind::Int, Value::Int(_))
            | (LocalKind::Long, Value::Long(_))
            | (LocalKind::Float, Value::Float(_))
            | (LocalKind::Double, Value::Double(_))
            | (LocalKind::Ref, Value::Ref(_))
            | (LocalKind::Ref, Value::Null)
    )
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, SandboxError> {
    stack.pop().ok_or(SandboxError::StackUnderflow)
}

fn pop_int(stack: &mut Vec<Value>) -> Result<i32, SandboxError> {
    match pop(stack)? {
        Value::Int(v) => Ok(v),
        _ => Err(SandboxError::TypeConfusion("expected an int on the stack")),
    }
}

fn pop_long(stack: &mut Vec<Value>) -> Result<i64, SandboxError> {
    match pop(stack)? {
        Value::Long(v) => Ok(v),
        _ => Err(SandboxError::TypeConfusion("expected a long on the stack")),
    }
}

fn pop_float(stack: &mut Vec<Value>) -> Result<f32, SandboxError> {
    match pop(stack)? {
        Value::Float(v) => Ok(v),
        _ => Err(SandboxError::TypeConfusion("expected a float on the stack")),
    }
}

fn pop_double(stack: &mut Vec<Value>) -> Result<f64, SandboxError> {
    match pop(stack)? {
        Value::Double(v) => Ok(v),
        _ => Err(SandboxError::TypeConfusion("expected a double on the stack")),
    }
}

fn pop_obj(stack: &mut Vec<Value>) -> Result<ObjRef, SandboxError> {
    match pop(stack)? {
        Value::Ref(obj) => Ok(obj),
        Value::Null => Err(SandboxError::Thrown(
            "java/lang/NullPointerException".to_owned(),
        )),
        _ => Err(SandboxError::TypeConfusion("expected a reference on the stack")),
    }
}

fn jump_target(
    label_positions: &HashMap<Label, usize>,
    label: Label,
) -> Result<usize, SandboxError> {
    label_positions
        .get(&label)
        .copied()
        .ok_or(SandboxError::UndefinedLabel(label))
}

fn array_size(count: i32) -> Result<usize, SandboxError> {
    if count < 0 {
        Err(SandboxError::NegativeArraySize(count))
    } else {
        Ok(count as usize)
    }
}

fn new_primitive_array(base: crate::jvm::BaseType, count: usize) -> Obj {
    use crate::jvm::BaseType;
    match base {
        BaseType::Boolean | BaseType::Byte => Obj::ByteArray(vec![0; count]),
        BaseType::Char => Obj::CharArray(vec![0; count]),
        BaseType::Short => Obj::ShortArray(vec![0; count]),
        BaseType::Int => Obj::IntArray(vec![0; count]),
        BaseType::Long => Obj::LongArray(vec![0; count]),
        BaseType::Float => Obj::FloatArray(vec![0.0; count]),
        BaseType::Double => Obj::DoubleArray(vec![0.0; count]),
    }
}

fn check_index(index: i32, length: usize) -> Result<usize, SandboxError> {
    if index < 0 || index as usize >= length {
        Err(SandboxError::IndexOutOfBounds { index, length })
    } else {
        Ok(index as usize)
    }
}

fn array_load(kind: ArrayKind, array: &ObjRef, index: i32) -> Result<Value, SandboxError> {
    let array = array.borrow();
    let length = array
        .array_len()
        .ok_or(SandboxError::TypeConfusion("array load on a non-array"))?;
    let index = check_index(index, length)?;
    Ok(match (kind, &*array) {
        (ArrayKind::Char, Obj::CharArray(values)) => Value::Int(values[index] as i32),
        (ArrayKind::Byte, Obj::ByteArray(values)) => Value::Int(values[index] as i32),
        (ArrayKind::Short, Obj::ShortArray(values)) => Value::Int(values[index] as i32),
        (ArrayKind::Int, Obj::IntArray(values)) => Value::Int(values[index]),
        (ArrayKind::Long, Obj::LongArray(values)) => Value::Long(values[index]),
        (ArrayKind::Float, Obj::FloatArray(values)) => Value::Float(values[index]),
        (ArrayKind::Double, Obj::DoubleArray(values)) => Value::Double(values[index]),
        (ArrayKind::Ref, Obj::RefArray { values, .. }) => values[index].clone(),
        _ => return Err(SandboxError::TypeConfusion("array load kind mismatch")),
    })
}

fn array_store(
    kind: ArrayKind,
    array: &ObjRef,
    index: i32,
    value: Value,
) -> Result<(), SandboxError> {
    let mut array = array.borrow_mut();
    let length = array
        .array_len()
        .ok_or(SandboxError::TypeConfusion("array store on a non-array"))?;
    let index = check_index(index, length)?;
    match (kind, &mut *array, value) {
        (ArrayKind::Char, Obj::CharArray(values), Value::Int(v)) => values[index] = v as u16,
        (ArrayKind::Byte, Obj::ByteArray(values), Value::Int(v)) => values[index] = v as i8,
        (ArrayKind::Short, Obj::ShortArray(values), Value::Int(v)) => values[index] = v as i16,
        (ArrayKind::Int, Obj::IntArray(values), Value::Int(v)) => values[index] = v,
        (ArrayKind::Long, Obj::LongArray(values), Value::Long(v)) => values[index] = v,
        (ArrayKind::Float, Obj::FloatArray(values), Value::Float(v)) => values[index] = v,
        (ArrayKind::Double, Obj::DoubleArray(values), Value::Double(v)) => values[index] = v,
        (ArrayKind::Ref, Obj::RefArray { values, .. }, value @ (Value::Ref(_) | Value::Null)) => {
            values[index] = value
        }
        _ => return Err(SandboxError::TypeConfusion("array store kind mismatch")),
    }
    Ok(())
}

fn ord_holds(comparison: OrdComparison, lhs: i32, rhs: i32) -> bool {
    match comparison {
        OrdComparison::EQ => lhs == rhs,
        OrdComparison::NE => lhs != rhs,
        OrdComparison::LT => lhs < rhs,
        OrdComparison::GE => lhs >= rhs,
        OrdComparison::GT => lhs > rhs,
        OrdComparison::LE => lhs <= rhs,
    }
}

fn run_stack_op(op: StackOp, stack: &mut Vec<Value>) -> Result<(), SandboxError> {
    match op {
        StackOp::Pop => {
            pop(stack)?;
        }
        StackOp::Pop2 => {
            let top = pop(stack)?;
            if !top.is_wide() {
                pop(stack)?;
            }
        }
        StackOp::Dup => {
            let top = stack.last().ok_or(SandboxError::StackUnderflow)?.clone();
            stack.push(top);
        }
        StackOp::DupX1 => {
            let v1 = pop(stack)?;
            let v2 = pop(stack)?;
            stack.push(v1.clone());
            stack.push(v2);
            stack.push(v1);
        }
        StackOp::DupX2 => {
            let v1 = pop(stack)?;
            let v2 = pop(stack)?;
            if v2.is_wide() {
                stack.push(v1.clone());
                stack.push(v2);
                stack.push(v1);
            } else {
                let v3 = pop(stack)?;
                stack.push(v1.clone());
                stack.push(v3);
                stack.push(v2);
                stack.push(v1);
            }
        }
        StackOp::Dup2 => {
            let v1 = pop(stack)?;
            if v1.is_wide() {
                stack.push(v1.clone());
                stack.push(v1);
            } else {
                let v2 = pop(stack)?;
                stack.push(v2.clone());
                stack.push(v1.clone());
                stack.push(v2);
                stack.push(v1);
            }
        }
        StackOp::Dup2X1 => {
            let v1 = pop(stack)?;
            if v1.is_wide() {
                let v2 = pop(stack)?;
                stack.push(v1.clone());
                stack.push(v2);
                stack.push(v1);
            } else {
                let v2 = pop(stack)?;
                let v3 = pop(stack)?;
                stack.push(v2.clone());
                stack.push(v1.clone());
                stack.push(v3);
                stack.push(v2);
                stack.push(v1);
            }
        }
        StackOp::Dup2X2 => {
            let v1 = pop(stack)?;
            if v1.is_wide() {
                let v2 = pop(stack)?;
                if v2.is_wide() {
                    stack.push(v1.clone());
                    stack.push(v2);
                    stack.push(v1);
                } else {
                    let v3 = pop(stack)?;
                    stack.push(v1.clone());
                    stack.push(v3);
                    stack.push(v2);
                    stack.push(v1);
                }
            } else {
                let v2 = pop(stack)?;
                let v3 = pop(stack)?;
                if v3.is_wide() {
                    stack.push(v2.clone());
                    stack.push(v1.clone());
                    stack.push(v3);
                    stack.push(v2);
                    stack.push(v1);
                } else {
                    let v4 = pop(stack)?;
                    stack.push(v2.clone());
                    stack.push(v1.clone());
                    stack.push(v4);
                    stack.push(v3);
                    stack.push(v2);
                    stack.push(v1);
                }
            }
        }
        StackOp::Swap => {
            let v1 = pop(stack)?;
            let v2 = pop(stack)?;
            stack.push(v1);
            stack.push(v2);
        }
    }
    Ok(())
}

fn run_arith_op(op: ArithOp, stack: &mut Vec<Value>) -> Result<(), SandboxError> {
    use ArithOp::*;
    let result = match op {
        INeg => Value::Int(pop_int(stack)?.wrapping_neg()),
        LNeg => Value::Long(pop_long(stack)?.wrapping_neg()),
        FNeg => Value::Float(-pop_float(stack)?),
        DNeg => Value::Double(-pop_double(stack)?),

        IShl | IShr | IUshr => {
            let amount = pop_int(stack)? & 0x1F;
            let value = pop_int(stack)?;
            Value::Int(match op {
                IShl => value.wrapping_shl(amount as u32),
                IShr => value.wrapping_shr(amount as u32),
                _ => ((value as u32).wrapping_shr(amount as u32)) as i32,
            })
        }
        LShl | LShr | LUshr => {
            let amount = pop_int(stack)? & 0x3F;
            let value = pop_long(stack)?;
            Value::Long(match op {
                LShl => value.wrapping_shl(amount as u32),
                LShr => value.wrapping_shr(amount as u32),
                _ => ((value as u64).wrapping_shr(amount as u32)) as i64,
            })
        }

        IAdd | ISub | IMul | IDiv | IRem | IAnd | IOr | IXor => {
            let rhs = pop_int(stack)?;
            let lhs = pop_int(stack)?;
            Value::Int(match op {
                IAdd => lhs.wrapping_add(rhs),
                ISub => lhs.wrapping_sub(rhs),
                IMul => lhs.wrapping_mul(rhs),
                IDiv => {
                    if rhs == 0 {
                        return Err(SandboxError::Arithmetic("integer division by zero"));
                    }
                    lhs.wrapping_div(rhs)
                }
                IRem => {
                    if rhs == 0 {
                        return Err(SandboxError::Arithmetic("integer remainder by zero"));
                    }
                    lhs.wrapping_rem(rhs)
                }
                IAnd => lhs & rhs,
                IOr => lhs | rhs,
                _ => lhs ^ rhs,
            })
        }
        LAdd | LSub | LMul | LDiv | LRem | LAnd | LOr | LXor => {
            let rhs = pop_long(stack)?;
            let lhs = pop_long(stack)?;
            Value::Long(match op {
                LAdd => lhs.wrapping_add(rhs),
                LSub => lhs.wrapping_sub(rhs),
                LMul => lhs.wrapping_mul(rhs),
                LDiv => {
                    if rhs == 0 {
                        return Err(SandboxError::Arithmetic("long division by zero"));
                    }
                    lhs.wrapping_div(rhs)
                }
                LRem => {
                    if rhs == 0 {
                        return Err(SandboxError::Arithmetic("long remainder by zero"));
                    }
                    lhs.wrapping_rem(rhs)
                }
                LAnd => lhs & rhs,
                LOr => lhs | rhs,
                _ => lhs ^ rhs,
            })
        }
        FAdd | FSub | FMul | FDiv | FRem => {
            let rhs = pop_float(stack)?;
            let lhs = pop_float(stack)?;
            Value::Float(match op {
                FAdd => lhs + rhs,
                FSub => lhs - rhs,
                FMul => lhs * rhs,
                FDiv => lhs / rhs,
                _ => lhs % rhs,
            })
        }
        DAdd | DSub | DMul | DDiv | DRem => {
            let rhs = pop_double(stack)?;
            let lhs = pop_double(stack)?;
            Value::Double(match op {
                DAdd => lhs + rhs,
                DSub => lhs - rhs,
                DMul => lhs * rhs,
                DDiv => lhs / rhs,
                _ => lhs % rhs,
            })
        }
    };
    stack.push(result);
    Ok(())
}

fn run_conv_op(op: ConvOp, stack: &mut Vec<Value>) -> Result<(), SandboxError> {
    use ConvOp::*;
    let result = match op {
        I2L => Value::Long(pop_int(stack)? as i64),
        I2F => Value::Float(pop_int(stack)? as f32),
        I2D => Value::Double(pop_int(stack)? as f64),
        L2I => Value::Int(pop_long(stack)? as i32),
        L2F => Value::Float(pop_long(stack)? as f32),
        L2D => Value::Double(pop_long(stack)? as f64),
        F2I => Value::Int(pop_float(stack)? as i32),
        F2L => Value::Long(pop_float(stack)? as i64),
        F2D => Value::Double(pop_float(stack)? as f64),
        D2I => Value::Int(pop_double(stack)? as i32),
        D2L => Value::Long(pop_double(stack)? as i64),
        D2F => Value::Float(pop_double(stack)? as f32),
        I2B => Value::Int(pop_int(stack)? as i8 as i32),
        I2C => Value::Int(pop_int(stack)? as u16 as i32),
        I2S => Value::Int(pop_int(stack)? as i16 as i32),
    };
    stack.push(result);
    Ok(())
}

fn run_cmp_op(op: CmpOp, stack: &mut Vec<Value>) -> Result<(), SandboxError> {
    let result = match op {
        CmpOp::LCmp => {
            let rhs = pop_long(stack)?;
            let lhs = pop_long(stack)?;
            match lhs.cmp(&rhs) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }
        }
        CmpOp::FCmpL | CmpOp::FCmpG => {
            let rhs = pop_float(stack)?;
            let lhs = pop_float(stack)?;
            compare_floats(lhs as f64, rhs as f64, op == CmpOp::FCmpG)
        }
        CmpOp::DCmpL | CmpOp::DCmpG => {
            let rhs = pop_double(stack)?;
            let lhs = pop_double(stack)?;
            compare_floats(lhs, rhs, op == CmpOp::DCmpG)
        }
    };
    stack.push(Value::Int(result));
    Ok(())
}

fn compare_floats(lhs: f64, rhs: f64, nan_is_positive: bool) -> i32 {
    if lhs.is_nan() || rhs.is_nan() {
        if nan_is_positive {
            1
        } else {
            -1
        }
    } else if lhs < rhs {
        -1
    } else if lhs > rhs {
        1
    } else {
        0
    }
}
