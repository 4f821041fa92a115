//! IR generator for BSQ
//!
//! Lowers a checked AST into an LLVM module using inkwell. Value mapping:
//!
//! - `Numeric` is an IEEE-754 `double`.
//! - `Boolean` is `i1` in registers and `i8` in memory; `zext`/`trunc` are
//!   inserted at store/load boundaries.
//! - `Textual` is a pointer to a NUL-terminated heap buffer. Every textual
//!   slot always holds a freeable pointer: parameters are cloned on entry,
//!   other textual locals start as `malloc(1)`.
//! - `Array` is a stack allocation of `double`s addressed 1-based through
//!   `getelementptr`.
//!
//! Subroutines are emitted in two phases (declare all, then define) so
//! calls between them resolve regardless of definition order.

use std::collections::HashMap;

use inkwell::basic_block::BasicBlock;
use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::types::{BasicMetadataTypeEnum, BasicType, BasicTypeEnum, FunctionType};
use inkwell::values::{
    BasicMetadataValueEnum, BasicValueEnum, FunctionValue, PointerValue,
};
use inkwell::{AddressSpace, FloatPredicate, IntPredicate};
use thiserror::Error;

use crate::ast::{
    identifier_type, names_equal, Apply, DataType, Expr, ExprKind, Operation, Program, Statement,
    Subroutine,
};

/// Runtime library signatures in the `ret(params)` letter notation:
/// `T` text pointer, `N` double, `B` boolean, `V` void.
const LIBRARY_SIGNATURES: &[(&str, &str)] = &[
    ("bsq_text_clone", "T(T)"),
    ("bsq_text_input", "T(T)"),
    ("bsq_text_print", "V(T)"),
    ("bsq_text_conc", "T(TT)"),
    ("bsq_text_mid", "T(TNN)"),
    ("bsq_text_str", "T(N)"),
    ("bsq_text_eq", "B(TT)"),
    ("bsq_text_ne", "B(TT)"),
    ("bsq_text_gt", "B(TT)"),
    ("bsq_text_ge", "B(TT)"),
    ("bsq_text_lt", "B(TT)"),
    ("bsq_text_le", "B(TT)"),
    ("bsq_number_input", "N(T)"),
    ("bsq_number_print", "V(N)"),
    ("pow", "N(NN)"),
    ("sqrt", "N(N)"),
];

/// Code generation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodegenError {
    #[error("module verification failed: {0}")]
    Verify(String),
}

/// The IR generator
pub struct IrGenerator<'ctx, 'p> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    program: &'p Program,
    /// External runtime symbols, declared lazily on first use
    library_functions: HashMap<&'static str, FunctionType<'ctx>>,
    /// Stack slot of each local of the subroutine being emitted
    variable_slots: Vec<PointerValue<'ctx>>,
    /// Interned text literals: the same literal reuses one global
    textual_constants: HashMap<String, PointerValue<'ctx>>,
}

impl<'ctx, 'p> IrGenerator<'ctx, 'p> {
    pub fn new(context: &'ctx Context, program: &'p Program) -> Self {
        let module = context.create_module(&program.filename);
        let builder = context.create_builder();

        let mut generator = Self {
            context,
            module,
            builder,
            program,
            library_functions: HashMap::new(),
            variable_slots: Vec::new(),
            textual_constants: HashMap::new(),
        };
        generator.prepare_library();
        generator
    }

    /// Lower the whole program and verify the resulting module
    pub fn emit(mut self) -> Result<Module<'ctx>, CodegenError> {
        self.declare_subroutines();

        let program = self.program;
        for sub in &program.subs {
            if !sub.is_builtin {
                self.define_subroutine(sub);
            }
        }

        self.create_entry_point();

        self.module
            .verify()
            .map_err(|e| CodegenError::Verify(e.to_string()))?;
        Ok(self.module)
    }

    // ============ Types ============

    fn basic_type(&self, ty: DataType) -> BasicTypeEnum<'ctx> {
        match ty {
            DataType::Boolean => self.context.bool_type().into(),
            DataType::Textual => self.context.i8_type().ptr_type(AddressSpace::default()).into(),
            // Array values travel as element loads
            _ => self.context.f64_type().into(),
        }
    }

    fn library_signature(&self, signature: &str) -> FunctionType<'ctx> {
        let letter_type = |c: char| -> BasicTypeEnum<'ctx> {
            match c {
                'B' => self.context.bool_type().into(),
                'T' => self.context.i8_type().ptr_type(AddressSpace::default()).into(),
                _ => self.context.f64_type().into(),
            }
        };

        // "T(TNN)": one return letter, parameter letters in parentheses
        let mut letters = signature.chars();
        let ret = letters.next().unwrap();
        let params: Vec<BasicMetadataTypeEnum<'ctx>> = signature[2..signature.len() - 1]
            .chars()
            .map(|c| letter_type(c).into())
            .collect();

        match ret {
            'V' => self.context.void_type().fn_type(&params, false),
            c => letter_type(c).fn_type(&params, false),
        }
    }

    fn prepare_library(&mut self) {
        for (name, signature) in LIBRARY_SIGNATURES {
            let fn_type = self.library_signature(signature);
            self.library_functions.insert(name, fn_type);
        }

        let ptr_type = self.context.i8_type().ptr_type(AddressSpace::default());
        let i64_type = self.context.i64_type();
        self.library_functions.insert(
            "malloc",
            ptr_type.fn_type(&[i64_type.into()], false),
        );
        self.library_functions.insert(
            "free",
            self.context.void_type().fn_type(&[ptr_type.into()], false),
        );
    }

    fn library_function(&self, name: &str) -> FunctionValue<'ctx> {
        if let Some(function) = self.module.get_function(name) {
            return function;
        }
        self.module.add_function(name, self.library_functions[name], None)
    }

    fn call_library(
        &self,
        name: &str,
        args: &[BasicMetadataValueEnum<'ctx>],
    ) -> Option<BasicValueEnum<'ctx>> {
        let function = self.library_function(name);
        self.builder
            .build_call(function, args, "call")
            .unwrap()
            .try_as_basic_value()
            .left()
    }

    /// Built-in names translate to runtime symbols; everything else resolves
    /// by its own IR name.
    fn callee_function(&self, sub: &Subroutine) -> FunctionValue<'ctx> {
        match sub.name.as_str() {
            "MID$" => self.library_function("bsq_text_mid"),
            "STR$" => self.library_function("bsq_text_str"),
            "SQR" => self.library_function("sqrt"),
            name => self.module.get_function(name).unwrap(),
        }
    }

    // ============ Subroutines ============

    /// Declare every user subroutine up front so forward calls resolve
    fn declare_subroutines(&self) {
        for sub in &self.program.subs {
            if sub.is_builtin {
                continue;
            }

            let params: Vec<BasicMetadataTypeEnum<'ctx>> = sub
                .params
                .iter()
                .map(|p| self.basic_type(identifier_type(p)).into())
                .collect();

            let fn_type = if sub.is_returning_value {
                self.basic_type(identifier_type(&sub.name)).fn_type(&params, false)
            } else {
                self.context.void_type().fn_type(&params, false)
            };

            self.module.add_function(&sub.name, fn_type, None);
        }
    }

    fn define_subroutine(&mut self, sub: &'p Subroutine) {
        let function = self.module.get_function(&sub.name).unwrap();

        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);

        // Stack slots for every local, arrays sized from their DIM
        self.variable_slots.clear();
        let mut slots = Vec::with_capacity(sub.locals.len());
        for local in &sub.locals {
            let name = format!("{}_addr", local.name);
            let slot = match local.ty {
                DataType::Array => {
                    let size = self
                        .context
                        .i32_type()
                        .const_int(local.array_size as u64, false);
                    self.builder
                        .build_array_alloca(self.context.f64_type(), size, &name)
                        .unwrap()
                }
                DataType::Boolean => self
                    .builder
                    .build_alloca(self.context.i8_type(), &name)
                    .unwrap(),
                ty => self.builder.build_alloca(self.basic_type(ty), &name).unwrap(),
            };
            slots.push(slot);
        }

        // Parameters spill into their slots; textual parameters are cloned
        // so the callee owns every buffer its slots point to.
        for (i, param_name) in sub.params.iter().enumerate() {
            let argument = function.get_nth_param(i as u32).unwrap();
            argument.set_name(param_name);
            match identifier_type(param_name) {
                DataType::Textual => {
                    let owned = self
                        .call_library("bsq_text_clone", &[argument.into()])
                        .unwrap();
                    self.builder.build_store(slots[i], owned).unwrap();
                }
                DataType::Boolean => {
                    let wide = self
                        .builder
                        .build_int_z_extend(
                            argument.into_int_value(),
                            self.context.i8_type(),
                            "frombool",
                        )
                        .unwrap();
                    self.builder.build_store(slots[i], wide).unwrap();
                }
                _ => {
                    self.builder.build_store(slots[i], argument).unwrap();
                }
            }
        }

        // Every remaining textual slot gets a one-byte allocation so that
        // the free-before-store discipline never sees a wild pointer.
        let one = self.context.i64_type().const_int(1, false);
        for (i, local) in sub.locals.iter().enumerate() {
            if local.ty == DataType::Textual && i >= sub.params.len() {
                let buffer = self.call_library("malloc", &[one.into()]).unwrap();
                self.builder.build_store(slots[i], buffer).unwrap();
            }
        }

        self.variable_slots = slots;

        self.emit_statement(&sub.body, sub);

        // Release textual locals; the return slot keeps its buffer alive
        // for the caller.
        for (i, local) in sub.locals.iter().enumerate() {
            if local.ty != DataType::Textual || names_equal(&local.name, &sub.name) {
                continue;
            }
            let value = self
                .builder
                .build_load(self.variable_slots[i], &local.name)
                .unwrap();
            self.call_library("free", &[value.into()]);
        }

        if function.get_type().get_return_type().is_some() {
            let return_slot = sub.return_slot().unwrap();
            let slot = self.variable_slots[return_slot];
            let loaded = self.builder.build_load(slot, "result").unwrap();
            let value = if sub.locals[return_slot].ty == DataType::Boolean {
                self.builder
                    .build_int_truncate(loaded.into_int_value(), self.context.bool_type(), "result")
                    .unwrap()
                    .into()
            } else {
                loaded
            };
            self.builder.build_return(Some(&value)).unwrap();
        } else {
            self.builder.build_return(None).unwrap();
        }
    }

    /// `main` returns `i32 0`; a user-defined `Main` runs first
    fn create_entry_point(&mut self) {
        let i32_type = self.context.i32_type();
        let main_type = i32_type.fn_type(&[], false);
        let main_function = self.module.add_function("main", main_type, None);

        let start = self.context.append_basic_block(main_function, "start");
        self.builder.position_at_end(start);

        if let Some(user_main) = self.module.get_function("Main") {
            self.builder.build_call(user_main, &[], "call").unwrap();
        }

        self.builder
            .build_return(Some(&i32_type.const_int(0, false)))
            .unwrap();
    }

    // ============ Statements ============

    fn emit_statement(&mut self, statement: &Statement, sub: &'p Subroutine) {
        match statement {
            Statement::Seq(items) => {
                for item in items {
                    self.emit_statement(item, sub);
                }
            }
            Statement::Let { var, index, value } => self.emit_let(*var, index, value, sub),
            // Storage for the array was already carved out at function entry
            Statement::Dim { .. } => {}
            Statement::Input { prompt, var, index } => {
                self.emit_input(prompt, *var, index, sub)
            }
            Statement::Print(expression) => self.emit_print(expression, sub),
            Statement::If {
                cond,
                then,
                otherwise,
            } => {
                let function = self.current_function();
                let end_block = self.context.append_basic_block(function, "if_end");
                self.emit_if_chain(cond, then, otherwise.as_deref(), end_block, sub);
                self.builder.position_at_end(end_block);
            }
            Statement::While { cond, body } => self.emit_while(cond, body, sub),
            Statement::For {
                var,
                begin,
                end,
                step,
                body,
            } => self.emit_for(*var, begin, end, *step, body, sub),
            Statement::Call(apply) => {
                self.emit_apply(apply, sub);
            }
        }
    }

    fn emit_let(&mut self, var: usize, index: &Option<Expr>, value: &Expr, sub: &'p Subroutine) {
        let mut stored = self.emit_expression(value, sub).unwrap();
        let slot = self.variable_slots[var];

        if let Some(index) = index {
            let element = self.array_element_address(slot, index, sub);
            self.builder.build_store(element, stored).unwrap();
            return;
        }

        match sub.locals[var].ty {
            DataType::Textual => {
                let old = self
                    .builder
                    .build_load(slot, "old")
                    .unwrap();
                self.call_library("free", &[old.into()]);
                // A temporary is moved into the slot; anything else is
                // cloned so the slot has its own buffer to free later.
                if !is_temporary_text(value) {
                    stored = self.call_library("bsq_text_clone", &[stored.into()]).unwrap();
                }
                self.builder.build_store(slot, stored).unwrap();
            }
            DataType::Boolean => {
                let wide = self
                    .builder
                    .build_int_z_extend(
                        stored.into_int_value(),
                        self.context.i8_type(),
                        "frombool",
                    )
                    .unwrap();
                self.builder.build_store(slot, wide).unwrap();
            }
            _ => {
                self.builder.build_store(slot, stored).unwrap();
            }
        }
    }

    fn emit_input(
        &mut self,
        prompt: &str,
        var: usize,
        index: &Option<Expr>,
        sub: &'p Subroutine,
    ) {
        let prompt = self.intern_text(prompt);
        let slot = self.variable_slots[var];

        if let Some(index) = index {
            let value = self
                .call_library("bsq_number_input", &[prompt.into()])
                .unwrap();
            let element = self.array_element_address(slot, index, sub);
            self.builder.build_store(element, value).unwrap();
            return;
        }

        match sub.locals[var].ty {
            DataType::Textual => {
                let old = self
                    .builder
                    .build_load(slot, "old")
                    .unwrap();
                self.call_library("free", &[old.into()]);
                let value = self.call_library("bsq_text_input", &[prompt.into()]).unwrap();
                self.builder.build_store(slot, value).unwrap();
            }
            _ => {
                let value = self
                    .call_library("bsq_number_input", &[prompt.into()])
                    .unwrap();
                self.builder.build_store(slot, value).unwrap();
            }
        }
    }

    fn emit_print(&mut self, expression: &Expr, sub: &'p Subroutine) {
        let value = self.emit_expression(expression, sub).unwrap();
        match expression.ty {
            DataType::Textual => {
                self.call_library("bsq_text_print", &[value.into()]);
                if is_temporary_text(expression) {
                    self.call_library("free", &[value.into()]);
                }
            }
            DataType::Boolean => {
                // TRUE/FALSE spelled out through the interned literal pool
                let true_text = self.intern_text("TRUE");
                let false_text = self.intern_text("FALSE");
                let text = self
                    .builder
                    .build_select(value.into_int_value(), true_text, false_text, "bool_text")
                    .unwrap();
                self.call_library("bsq_text_print", &[text.into()]);
            }
            _ => {
                self.call_library("bsq_number_print", &[value.into()]);
            }
        }
    }

    /// Lower one arm of an IF/ELSEIF chain; every arm branches to the
    /// shared end block.
    fn emit_if_chain(
        &mut self,
        cond: &Expr,
        then: &Statement,
        otherwise: Option<&Statement>,
        end_block: BasicBlock<'ctx>,
        sub: &'p Subroutine,
    ) {
        let function = self.current_function();
        let then_block = self.context.append_basic_block(function, "if_then");
        let else_block = self.context.append_basic_block(function, "if_else");

        let condition = self.emit_expression(cond, sub).unwrap().into_int_value();
        self.builder
            .build_conditional_branch(condition, then_block, else_block)
            .unwrap();

        self.builder.position_at_end(then_block);
        self.emit_statement(then, sub);
        self.branch_to(end_block);

        self.builder.position_at_end(else_block);
        match otherwise {
            Some(Statement::If {
                cond,
                then,
                otherwise,
            }) => {
                self.emit_if_chain(cond, then, otherwise.as_deref(), end_block, sub);
            }
            Some(statement) => {
                self.emit_statement(statement, sub);
                self.branch_to(end_block);
            }
            None => {
                self.branch_to(end_block);
            }
        }
    }

    fn emit_while(&mut self, cond: &Expr, body: &Statement, sub: &'p Subroutine) {
        let function = self.current_function();
        let cond_block = self.context.append_basic_block(function, "while_cond");
        let body_block = self.context.append_basic_block(function, "while_body");
        let end_block = self.context.append_basic_block(function, "while_end");

        self.branch_to(cond_block);
        self.builder.position_at_end(cond_block);
        let condition = self.emit_expression(cond, sub).unwrap().into_int_value();
        self.builder
            .build_conditional_branch(condition, body_block, end_block)
            .unwrap();

        self.builder.position_at_end(body_block);
        self.emit_statement(body, sub);
        self.branch_to(cond_block);

        self.builder.position_at_end(end_block);
    }

    fn emit_for(
        &mut self,
        var: usize,
        begin: &Expr,
        end: &Expr,
        step: f64,
        body: &Statement,
        sub: &'p Subroutine,
    ) {
        let function = self.current_function();
        let f64_type = self.context.f64_type();
        let slot = self.variable_slots[var];

        let begin = self.emit_expression(begin, sub).unwrap();
        self.builder.build_store(slot, begin).unwrap();
        // The end bound is evaluated once, before the loop
        let end = self.emit_expression(end, sub).unwrap().into_float_value();
        let step_value = f64_type.const_float(step);

        let cond_block = self.context.append_basic_block(function, "for_cond");
        let body_block = self.context.append_basic_block(function, "for_body");
        let end_block = self.context.append_basic_block(function, "for_end");

        self.branch_to(cond_block);
        self.builder.position_at_end(cond_block);
        let current = self
            .builder
            .build_load(slot, &sub.locals[var].name)
            .unwrap()
            .into_float_value();
        // The step sign picks the comparison direction
        let predicate = if step > 0.0 {
            FloatPredicate::OLT
        } else {
            FloatPredicate::OGT
        };
        let condition = self
            .builder
            .build_float_compare(predicate, current, end, "for_cmp")
            .unwrap();
        self.builder
            .build_conditional_branch(condition, body_block, end_block)
            .unwrap();

        self.builder.position_at_end(body_block);
        self.emit_statement(body, sub);
        let current = self
            .builder
            .build_load(slot, &sub.locals[var].name)
            .unwrap()
            .into_float_value();
        let advanced = self
            .builder
            .build_float_add(current, step_value, "advance")
            .unwrap();
        self.builder.build_store(slot, advanced).unwrap();
        self.branch_to(cond_block);

        self.builder.position_at_end(end_block);
    }

    // ============ Expressions ============

    fn emit_expression(
        &mut self,
        expression: &Expr,
        sub: &'p Subroutine,
    ) -> Option<BasicValueEnum<'ctx>> {
        match &expression.kind {
            ExprKind::Boolean(value) => Some(
                self.context
                    .bool_type()
                    .const_int(*value as u64, false)
                    .into(),
            ),
            ExprKind::Number(value) => {
                Some(self.context.f64_type().const_float(*value).into())
            }
            ExprKind::Text(value) => Some(self.intern_text(value).into()),

            ExprKind::Variable(var) => {
                let slot = self.variable_slots[*var];
                let local = &sub.locals[*var];
                let value = match local.ty {
                    DataType::Boolean => {
                        let wide = self
                            .builder
                            .build_load(slot, &local.name)
                            .unwrap();
                        self.builder
                            .build_int_truncate(
                                wide.into_int_value(),
                                self.context.bool_type(),
                                "tobool",
                            )
                            .unwrap()
                            .into()
                    }
                    DataType::Textual => self
                        .builder
                        .build_load(slot, &local.name)
                        .unwrap(),
                    _ => self
                        .builder
                        .build_load(slot, &local.name)
                        .unwrap(),
                };
                Some(value)
            }

            ExprKind::Item { array, index } => {
                let slot = self.variable_slots[*array];
                let element = self.array_element_address(slot, index, sub);
                Some(
                    self.builder
                        .build_load(element, "item")
                        .unwrap(),
                )
            }

            ExprKind::Unary { op, operand } => {
                let value = self.emit_expression(operand, sub).unwrap();
                let result = match op {
                    Operation::Sub => self
                        .builder
                        .build_float_neg(value.into_float_value(), "neg")
                        .unwrap()
                        .into(),
                    _ => self
                        .builder
                        .build_not(value.into_int_value(), "not")
                        .unwrap()
                        .into(),
                };
                Some(result)
            }

            ExprKind::Binary { op, lhs, rhs } => Some(self.emit_binary(*op, lhs, rhs, sub)),

            ExprKind::Apply(apply) => self.emit_apply(apply, sub),
        }
    }

    fn emit_binary(
        &mut self,
        op: Operation,
        lhs: &Expr,
        rhs: &Expr,
        sub: &'p Subroutine,
    ) -> BasicValueEnum<'ctx> {
        let is_textual = lhs.ty == DataType::Textual && rhs.ty == DataType::Textual;

        let left = self.emit_expression(lhs, sub).unwrap();
        let right = self.emit_expression(rhs, sub).unwrap();

        if is_textual {
            let runtime = match op {
                Operation::Conc => "bsq_text_conc",
                Operation::Eq => "bsq_text_eq",
                Operation::Ne => "bsq_text_ne",
                Operation::Gt => "bsq_text_gt",
                Operation::Ge => "bsq_text_ge",
                Operation::Lt => "bsq_text_lt",
                Operation::Le => "bsq_text_le",
                // The checker admits no other textual operation
                _ => unreachable!("textual operands with {}", op),
            };
            let result = self
                .call_library(runtime, &[left.into(), right.into()])
                .unwrap();
            // The runtime does not take ownership of its operands
            if is_temporary_text(lhs) {
                self.call_library("free", &[left.into()]);
            }
            if is_temporary_text(rhs) {
                self.call_library("free", &[right.into()]);
            }
            return result;
        }

        match op {
            Operation::Add => self
                .builder
                .build_float_add(left.into_float_value(), right.into_float_value(), "add")
                .unwrap()
                .into(),
            Operation::Sub => self
                .builder
                .build_float_sub(left.into_float_value(), right.into_float_value(), "sub")
                .unwrap()
                .into(),
            Operation::Mul => self
                .builder
                .build_float_mul(left.into_float_value(), right.into_float_value(), "mul")
                .unwrap()
                .into(),
            Operation::Div => self
                .builder
                .build_float_div(left.into_float_value(), right.into_float_value(), "div")
                .unwrap()
                .into(),
            Operation::Mod => self
                .builder
                .build_float_rem(left.into_float_value(), right.into_float_value(), "rem")
                .unwrap()
                .into(),
            Operation::Pow => self
                .call_library("pow", &[left.into(), right.into()])
                .unwrap(),

            Operation::Eq | Operation::Ne if lhs.ty == DataType::Boolean => {
                let predicate = if op == Operation::Eq {
                    IntPredicate::EQ
                } else {
                    IntPredicate::NE
                };
                self.builder
                    .build_int_compare(
                        predicate,
                        left.into_int_value(),
                        right.into_int_value(),
                        "cmp",
                    )
                    .unwrap()
                    .into()
            }

            Operation::Eq
            | Operation::Ne
            | Operation::Gt
            | Operation::Ge
            | Operation::Lt
            | Operation::Le => {
                let predicate = match op {
                    Operation::Eq => FloatPredicate::OEQ,
                    Operation::Ne => FloatPredicate::ONE,
                    Operation::Gt => FloatPredicate::OGT,
                    Operation::Ge => FloatPredicate::OGE,
                    Operation::Lt => FloatPredicate::OLT,
                    _ => FloatPredicate::OLE,
                };
                self.builder
                    .build_float_compare(
                        predicate,
                        left.into_float_value(),
                        right.into_float_value(),
                        "cmp",
                    )
                    .unwrap()
                    .into()
            }

            Operation::And => self
                .builder
                .build_and(left.into_int_value(), right.into_int_value(), "and")
                .unwrap()
                .into(),
            Operation::Or => self
                .builder
                .build_or(left.into_int_value(), right.into_int_value(), "or")
                .unwrap()
                .into(),

            // Conc on non-text and Not are rejected by the checker
            _ => unreachable!("{} with {} operands", op, lhs.ty),
        }
    }

    /// Evaluate arguments, call, then free any argument that was an owned
    /// temporary: the callee cloned what it needs on entry, so neither side
    /// refers to the buffer afterwards.
    fn emit_apply(&mut self, apply: &Apply, sub: &'p Subroutine) -> Option<BasicValueEnum<'ctx>> {
        let mut args: Vec<BasicMetadataValueEnum<'ctx>> = Vec::with_capacity(apply.args.len());
        let mut temporaries = Vec::new();

        for argument in &apply.args {
            let value = self.emit_expression(argument, sub).unwrap();
            args.push(value.into());
            if is_temporary_text(argument) {
                temporaries.push(value);
            }
        }

        let callee = self.callee_function(&self.program.subs[apply.callee]);
        let call = self.builder.build_call(callee, &args, "call").unwrap();

        for temporary in temporaries {
            self.call_library("free", &[temporary.into()]);
        }

        call.try_as_basic_value().left()
    }

    // ============ Helpers ============

    fn current_function(&self) -> FunctionValue<'ctx> {
        self.builder
            .get_insert_block()
            .unwrap()
            .get_parent()
            .unwrap()
    }

    /// Branch to `block` unless the current block already terminated
    fn branch_to(&self, block: BasicBlock<'ctx>) {
        if let Some(current) = self.builder.get_insert_block() {
            if current.get_terminator().is_none() {
                self.builder.build_unconditional_branch(block).unwrap();
            }
        }
    }

    /// Address of a 1-based array element
    fn array_element_address(
        &mut self,
        slot: PointerValue<'ctx>,
        index: &Expr,
        sub: &'p Subroutine,
    ) -> PointerValue<'ctx> {
        let value = self.emit_expression(index, sub).unwrap();
        let one_based = self
            .builder
            .build_float_to_signed_int(
                value.into_float_value(),
                self.context.i32_type(),
                "index",
            )
            .unwrap();
        let zero_based = self
            .builder
            .build_int_add(
                self.context.i32_type().const_int(-1i64 as u64, true),
                one_based,
                "offset",
            )
            .unwrap();
        unsafe {
            self.builder
                .build_in_bounds_gep(slot, &[zero_based], "element")
                .unwrap()
        }
    }

    fn intern_text(&mut self, value: &str) -> PointerValue<'ctx> {
        if let Some(pointer) = self.textual_constants.get(value) {
            return *pointer;
        }
        let global = self
            .builder
            .build_global_string_ptr(value, "g_str")
            .unwrap();
        let pointer = global.as_pointer_value();
        self.textual_constants.insert(value.to_string(), pointer);
        pointer
    }
}

/// A text expression is an owned temporary unless it is a plain literal or
/// a direct variable load; whoever consumes it must free it or store it.
fn is_temporary_text(expression: &Expr) -> bool {
    expression.ty == DataType::Textual
        && !matches!(
            expression.kind,
            ExprKind::Text(_) | ExprKind::Variable(_)
        )
}
