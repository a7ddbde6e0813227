use crate::language::ast::{Expr, ExprKind};
use crate::language::compiler::ir::{BinaryOp, Callee, Code};
use crate::language::compiler::module::{Function, FunctionBody, Global, Module};
use crate::language::span::Span;
use crate::language::types::{StructType, Type, PRIMITIVE_TYPES};
use crate::runtime::value::Value;
use std::collections::HashMap;
use std::rc::Rc;

pub const SPECIAL_FORMS: &[&str] = &[
    "do", "let", "set", "if", "while", "and", "or", "not", "sizeof", "zeroed", "field", ".",
    "make", "load", "store", "cast", "offset", "addr", "seq", "len", "seq_copy",
];

const DECLARATION_WORDS: &[&str] = &["struct", "fun", "global", "template", "ptr", "true", "false"];

/// Names that can never be bound by a definition, parameter or local.
pub fn is_reserved(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
        || DECLARATION_WORDS.contains(&name)
        || PRIMITIVE_TYPES.contains(&name)
        || BinaryOp::from_symbol(name).is_some()
}

#[derive(Debug)]
pub(crate) struct LowerError {
    pub message: String,
    pub span: Span,
    pub help: Option<String>,
}

impl LowerError {
    fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

fn error(message: impl Into<String>, span: Span) -> LowerError {
    LowerError {
        message: message.into(),
        span,
        help: None,
    }
}

fn malformed(form: &str, shape: &str, span: Span) -> LowerError {
    error(format!("malformed `{form}`"), span).with_help(format!("expected `{shape}`"))
}

type LowerResult<T> = Result<T, LowerError>;

pub(crate) struct Initialiser {
    pub global: usize,
    pub locals: usize,
    pub code: Code,
    pub span: Span,
}

pub(crate) struct Lowered {
    pub functions: Vec<Function>,
    pub function_index: HashMap<String, usize>,
    pub types: HashMap<String, Rc<StructType>>,
    pub globals: Vec<Global>,
    pub initialisers: Vec<Initialiser>,
}

struct Signature {
    name: String,
    params: Vec<(String, Type)>,
    ret: Type,
}

struct StructDecl<'e> {
    def: Rc<StructType>,
    fields: &'e [Expr],
    span: Span,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Pending,
    Active,
    Done,
}

/// Everything a body can refer to: this unit's definitions, then `deps` in order, then `base`.
struct Context<'a> {
    deps: &'a [Module],
    base: &'a Module,
    structs: HashMap<String, Rc<StructType>>,
    signatures: Vec<Signature>,
    function_index: HashMap<String, usize>,
    globals: Vec<Global>,
}

fn flatten<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr.match_form("do") {
        Some(forms) => forms.iter().for_each(|form| flatten(form, out)),
        None => out.push(expr),
    }
}

fn declared_name<'e>(expr: &'e Expr, what: &str) -> LowerResult<&'e str> {
    let Some(name) = expr.as_symbol() else {
        return Err(error(format!("expected a {what} name, found `{expr}`"), expr.span));
    };
    if is_reserved(name) {
        return Err(error(
            format!("`{name}` is reserved and cannot name a {what}"),
            expr.span,
        ));
    }
    if name.contains('$') {
        return Err(error(format!("`{name}` contains an unsubstituted hole"), expr.span)
            .with_help("instantiate the template before compiling it"));
    }
    Ok(name)
}

fn pair<'e>(expr: &'e Expr, shape: &str) -> LowerResult<(&'e Expr, &'e Expr)> {
    match expr.as_list() {
        Some([first, second]) => Ok((first, second)),
        _ => Err(error(format!("expected `{shape}`, found `{expr}`"), expr.span)),
    }
}

/// Two-pass lowering of a unit: declarations first so bodies may refer to anything the unit
/// defines regardless of order.
pub(crate) fn lower_unit(root: &Expr, deps: &[Module], base: &Module) -> LowerResult<Lowered> {
    let mut forms = Vec::new();
    flatten(root, &mut forms);

    let mut ctx = Context {
        deps,
        base,
        structs: HashMap::new(),
        signatures: Vec::new(),
        function_index: HashMap::new(),
        globals: Vec::new(),
    };
    let mut struct_decls = Vec::new();
    let mut fun_forms = Vec::new();
    let mut global_forms = Vec::new();
    for form in forms {
        match form.head() {
            Some("struct") => {
                let args = form.match_form("struct").unwrap_or_default();
                let Some((name_expr, fields)) = args.split_first() else {
                    return Err(malformed("struct", "(struct Name (field Type) ...)", form.span));
                };
                let name = declared_name(name_expr, "struct")?;
                if ctx.structs.contains_key(name) {
                    return Err(error(format!("struct `{name}` is defined twice"), name_expr.span));
                }
                let def = StructType::declare(name);
                ctx.structs.insert(name.to_string(), def.clone());
                struct_decls.push(StructDecl {
                    def,
                    fields,
                    span: form.span,
                });
            }
            Some("fun") => fun_forms.push(form),
            Some("global") => global_forms.push(form),
            _ => {
                return Err(error("expected a top-level definition", form.span)
                    .with_help("modules contain `struct`, `fun` and `global` forms"));
            }
        }
    }

    let mut state = vec![Visit::Pending; struct_decls.len()];
    for idx in 0..struct_decls.len() {
        ctx.layout_struct(&struct_decls, idx, &mut state)?;
    }

    let mut bodies = Vec::with_capacity(fun_forms.len());
    for form in &fun_forms {
        let args = form.match_form("fun").unwrap_or_default();
        let [name_expr, params_expr, ret_expr, body @ ..] = args else {
            return Err(malformed("fun", "(fun name ((param Type) ...) Ret body ...)", form.span));
        };
        let name = declared_name(name_expr, "function")?;
        if ctx.function_index.contains_key(name) {
            return Err(error(format!("function `{name}` is defined twice"), name_expr.span));
        }
        let Some(param_exprs) = params_expr.as_list() else {
            return Err(error("expected a parameter list", params_expr.span)
                .with_help("write `()` for a function without parameters"));
        };
        let mut params: Vec<(String, Type)> = Vec::with_capacity(param_exprs.len());
        for param in param_exprs {
            let (param_name, ty_expr) = pair(param, "(param Type)")?;
            let param_name = declared_name(param_name, "parameter")?;
            if params.iter().any(|(existing, _)| existing == param_name) {
                return Err(error(format!("parameter `{param_name}` is declared twice"), param.span));
            }
            params.push((param_name.to_string(), ctx.resolve_type(ty_expr)?));
        }
        let ret = ctx.resolve_type(ret_expr)?;
        ctx.function_index.insert(name.to_string(), ctx.signatures.len());
        ctx.signatures.push(Signature {
            name: name.to_string(),
            params,
            ret,
        });
        bodies.push((body, form.span));
    }

    let mut inits = Vec::with_capacity(global_forms.len());
    for form in &global_forms {
        let args = form.match_form("global").unwrap_or_default();
        let [name_expr, ty_expr, init] = args else {
            return Err(malformed("global", "(global name Type init)", form.span));
        };
        let name = declared_name(name_expr, "global")?;
        if ctx.globals.iter().any(|global| global.name == name) {
            return Err(error(format!("global `{name}` is defined twice"), name_expr.span));
        }
        let ty = ctx.resolve_type(ty_expr)?;
        ctx.globals.push(Global {
            name: name.to_string(),
            ty,
        });
        inits.push(init);
    }

    let mut functions = Vec::with_capacity(bodies.len());
    for (index, (body, span)) in bodies.into_iter().enumerate() {
        let signature = &ctx.signatures[index];
        let mut lowerer = BodyLowerer::new(&ctx);
        for (param, ty) in &signature.params {
            lowerer.declare(param, ty.clone());
        }
        let (code, ty) = lowerer.lower_sequence(body)?;
        let code = if signature.ret == Type::Unit {
            match ty {
                Type::Unit => code,
                _ => Code::Block(vec![code, Code::Const(Value::Unit)]),
            }
        } else if assignable(&signature.ret, &ty) {
            code
        } else {
            let span = body.last().map_or(span, |last| last.span);
            return Err(error(
                format!(
                    "function `{}` returns {} but its body produces {ty}",
                    signature.name, signature.ret
                ),
                span,
            ));
        };
        functions.push(Function {
            name: signature.name.clone(),
            params: signature.params.clone(),
            ret: signature.ret.clone(),
            body: FunctionBody::Code {
                locals: lowerer.locals,
                code,
            },
        });
    }

    let mut initialisers = Vec::with_capacity(inits.len());
    for (global, init) in inits.into_iter().enumerate() {
        let mut lowerer = BodyLowerer::new(&ctx);
        let (code, ty) = lowerer.lower(init)?;
        let expected = &ctx.globals[global].ty;
        if !assignable(expected, &ty) {
            return Err(error(
                format!(
                    "global `{}` has type {expected} but is initialised with {ty}",
                    ctx.globals[global].name
                ),
                init.span,
            ));
        }
        initialisers.push(Initialiser {
            global,
            locals: lowerer.locals,
            code,
            span: init.span,
        });
    }

    Ok(Lowered {
        functions,
        function_index: ctx.function_index,
        types: ctx.structs,
        globals: ctx.globals,
        initialisers,
    })
}

impl Context<'_> {
    fn resolve_type(&self, expr: &Expr) -> LowerResult<Type> {
        match &expr.kind {
            ExprKind::Symbol(name) => {
                if let Some(ty) = Type::primitive(name) {
                    return Ok(ty);
                }
                if let Some(def) = self.structs.get(name.as_str()) {
                    return Ok(Type::Struct(def.clone()));
                }
                self.deps
                    .iter()
                    .find_map(|dep| dep.type_named(name))
                    .map(|handle| handle.ty())
                    .ok_or_else(|| error(format!("unknown type `{name}`"), expr.span))
            }
            ExprKind::List(items) => match items.as_slice() {
                [head, inner] if head.as_symbol() == Some("ptr") => {
                    Ok(Type::Ptr(Box::new(self.resolve_type(inner)?)))
                }
                [head, inner] if head.as_symbol() == Some("seq") => {
                    Ok(Type::Seq(Box::new(self.resolve_type(inner)?)))
                }
                _ => Err(error(format!("`{expr}` is not a type"), expr.span)
                    .with_help("compound types are `(ptr T)` and `(seq T)`")),
            },
            _ => Err(error(format!("`{expr}` is not a type"), expr.span)),
        }
    }

    fn layout_struct(
        &self,
        decls: &[StructDecl<'_>],
        idx: usize,
        state: &mut [Visit],
    ) -> LowerResult<()> {
        match state[idx] {
            Visit::Done => return Ok(()),
            Visit::Active => {
                return Err(error(
                    format!("struct `{}` contains itself by value", decls[idx].def.name),
                    decls[idx].span,
                )
                .with_help("store a `(ptr ...)` to break the cycle"));
            }
            Visit::Pending => {}
        }
        state[idx] = Visit::Active;
        let mut fields: Vec<(String, Type)> = Vec::with_capacity(decls[idx].fields.len());
        for field in decls[idx].fields {
            let (name_expr, ty_expr) = pair(field, "(field Type)")?;
            let name = declared_name(name_expr, "field")?;
            let ty = self.resolve_type(ty_expr)?;
            if let Type::Struct(def) = &ty {
                if let Some(inner) = decls.iter().position(|decl| Rc::ptr_eq(&decl.def, def)) {
                    self.layout_struct(decls, inner, state)?;
                }
            }
            if !ty.is_storable() {
                return Err(error(
                    format!("field `{name}` has type {ty}, which has no memory representation"),
                    ty_expr.span,
                ));
            }
            if fields.iter().any(|(existing, _)| existing == name) {
                return Err(error(format!("field `{name}` is declared twice"), field.span));
            }
            fields.push((name.to_string(), ty));
        }
        decls[idx].def.set_fields(fields);
        state[idx] = Visit::Done;
        Ok(())
    }

    fn global_index(&self, name: &str) -> Option<usize> {
        self.globals.iter().position(|global| global.name == name)
    }

    fn resolve_function(&self, name: &str) -> Option<(Callee, Vec<(String, Type)>, Type)> {
        if let Some(&index) = self.function_index.get(name) {
            let signature = &self.signatures[index];
            return Some((
                Callee::Local(index),
                signature.params.clone(),
                signature.ret.clone(),
            ));
        }
        self.deps
            .iter()
            .chain(std::iter::once(self.base))
            .find_map(|module| module.function(name))
            .map(|handle| {
                let params = handle.params().to_vec();
                let ret = handle.return_type().clone();
                (Callee::External(handle), params, ret)
            })
    }
}

/// Integers convert freely between widths; `(ptr u8)` converts to and from any pointer.
fn assignable(expected: &Type, found: &Type) -> bool {
    expected == found
        || (expected.is_integer() && found.is_integer())
        || matches!(
            (expected, found),
            (Type::Ptr(a), Type::Ptr(b)) if **a == Type::U8 || **b == Type::U8
        )
}

fn comparable(left: &Type, right: &Type) -> bool {
    match (left, right) {
        (Type::Ptr(_), Type::Ptr(_)) | (Type::Bool, Type::Bool) | (Type::Str, Type::Str) => true,
        (Type::Unit, Type::Unit) => true,
        (Type::Ptr(_), other) | (other, Type::Ptr(_)) => other.is_integer(),
        (left, right) => left.is_integer() && right.is_integer(),
    }
}

fn castable(from: &Type, to: &Type) -> bool {
    from == to
        || match to {
            Type::U8 | Type::I64 | Type::U64 => {
                from.is_integer() || matches!(from, Type::Bool | Type::Ptr(_))
            }
            Type::Bool => from.is_integer(),
            Type::Ptr(_) => from.is_integer() || matches!(from, Type::Ptr(_)),
            _ => false,
        }
}

struct BodyLowerer<'c, 'a> {
    ctx: &'c Context<'a>,
    scopes: Vec<Vec<(String, usize, Type)>>,
    locals: usize,
}

impl<'c, 'a> BodyLowerer<'c, 'a> {
    fn new(ctx: &'c Context<'a>) -> Self {
        Self {
            ctx,
            scopes: vec![Vec::new()],
            locals: 0,
        }
    }

    fn declare(&mut self, name: &str, ty: Type) -> usize {
        let slot = self.locals;
        self.locals += 1;
        if let Some(scope) = self.scopes.last_mut() {
            scope.push((name.to_string(), slot, ty));
        }
        slot
    }

    fn lookup_local(&self, name: &str) -> Option<(usize, Type)> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter().rev())
            .find(|(local, _, _)| local == name)
            .map(|(_, slot, ty)| (*slot, ty.clone()))
    }

    fn scoped<T>(&mut self, f: impl FnOnce(&mut Self) -> LowerResult<T>) -> LowerResult<T> {
        self.scopes.push(Vec::new());
        let result = f(self);
        self.scopes.pop();
        result
    }

    fn lower_sequence(&mut self, forms: &[Expr]) -> LowerResult<(Code, Type)> {
        self.scoped(|this| {
            let mut codes = Vec::with_capacity(forms.len());
            let mut ty = Type::Unit;
            for form in forms {
                let (code, form_ty) = this.lower(form)?;
                codes.push(code);
                ty = form_ty;
            }
            Ok((Code::Block(codes), ty))
        })
    }

    fn lower_boxed(&mut self, expr: &Expr) -> LowerResult<(Box<Code>, Type)> {
        let (code, ty) = self.lower(expr)?;
        Ok((Box::new(code), ty))
    }

    fn expect(&mut self, expr: &Expr, expected: &Type) -> LowerResult<Box<Code>> {
        let (code, ty) = self.lower_boxed(expr)?;
        if assignable(expected, &ty) {
            Ok(code)
        } else {
            Err(error(format!("expected {expected}, found {ty}"), expr.span))
        }
    }

    fn expect_integer(&mut self, expr: &Expr) -> LowerResult<(Box<Code>, Type)> {
        let (code, ty) = self.lower_boxed(expr)?;
        if ty.is_integer() {
            Ok((code, ty))
        } else {
            Err(error(format!("expected an integer, found {ty}"), expr.span))
        }
    }

    fn expect_pointer(&mut self, expr: &Expr) -> LowerResult<(Box<Code>, Type)> {
        let (code, ty) = self.lower_boxed(expr)?;
        match ty {
            Type::Ptr(inner) => Ok((code, *inner)),
            other => Err(error(format!("expected a pointer, found {other}"), expr.span)),
        }
    }

    fn expect_storable_pointer(&mut self, expr: &Expr) -> LowerResult<(Box<Code>, Type)> {
        let (code, pointee) = self.expect_pointer(expr)?;
        if pointee.is_storable() {
            Ok((code, pointee))
        } else {
            Err(error(format!("{pointee} cannot be read from or written to memory"), expr.span))
        }
    }

    fn field_name<'e>(&self, expr: &'e Expr) -> LowerResult<&'e str> {
        expr.as_symbol()
            .ok_or_else(|| error(format!("expected a field name, found `{expr}`"), expr.span))
    }

    fn lower(&mut self, expr: &Expr) -> LowerResult<(Code, Type)> {
        match &expr.kind {
            ExprKind::Int(value) => Ok((Code::Const(Value::Int(*value)), Type::I64)),
            ExprKind::Bool(value) => Ok((Code::Const(Value::Bool(*value)), Type::Bool)),
            ExprKind::Str(text) => Ok((Code::Const(Value::str(text)), Type::Str)),
            ExprKind::Symbol(name) => self.lower_name(name, expr.span),
            ExprKind::List(items) => {
                let Some((head, args)) = items.split_first() else {
                    return Ok((Code::Const(Value::Unit), Type::Unit));
                };
                let Some(op) = head.as_symbol() else {
                    return Err(error("expected an operator or function name", head.span));
                };
                if let Some(binary) = BinaryOp::from_symbol(op) {
                    return self.lower_binary(binary, args, expr);
                }
                self.lower_form(op, head, args, expr)
            }
        }
    }

    fn lower_name(&self, name: &str, span: Span) -> LowerResult<(Code, Type)> {
        if let Some((slot, ty)) = self.lookup_local(name) {
            return Ok((Code::Local(slot), ty));
        }
        if let Some(index) = self.ctx.global_index(name) {
            return Ok((Code::Global(index), self.ctx.globals[index].ty.clone()));
        }
        for dep in self.ctx.deps {
            if let Some(index) = dep.global_index(name) {
                let ty = dep.global_type(index).cloned().unwrap_or(Type::Unit);
                return Ok((Code::ExternalGlobal(dep.clone(), index), ty));
            }
        }
        let err = error(format!("unknown name `{name}`"), span);
        if self.ctx.resolve_function(name).is_some() {
            Err(err.with_help(format!("`{name}` is a function; call it as `({name} ...)`")))
        } else {
            Err(err)
        }
    }

    fn lower_form(
        &mut self,
        op: &str,
        head: &Expr,
        args: &[Expr],
        expr: &Expr,
    ) -> LowerResult<(Code, Type)> {
        let span = expr.span;
        match op {
            "do" => self.lower_sequence(args),
            "let" => {
                let [name, value] = args else {
                    return Err(malformed("let", "(let name value)", span));
                };
                let name = declared_name(name, "variable")?;
                let (code, ty) = self.lower(value)?;
                let slot = self.declare(name, ty);
                Ok((Code::SetLocal(slot, Box::new(code)), Type::Unit))
            }
            "set" => {
                let [target, value] = args else {
                    return Err(malformed("set", "(set name value)", span));
                };
                let Some(name) = target.as_symbol() else {
                    return Err(error("`set` expects a variable name", target.span));
                };
                if let Some((slot, ty)) = self.lookup_local(name) {
                    let code = self.expect(value, &ty)?;
                    return Ok((Code::SetLocal(slot, code), Type::Unit));
                }
                if let Some(index) = self.ctx.global_index(name) {
                    let ty = self.ctx.globals[index].ty.clone();
                    let code = self.expect(value, &ty)?;
                    return Ok((Code::SetGlobal(index, code), Type::Unit));
                }
                if self.ctx.deps.iter().any(|dep| dep.global_index(name).is_some()) {
                    return Err(error(
                        format!("`{name}` belongs to another module and cannot be assigned"),
                        target.span,
                    ));
                }
                Err(error(format!("unknown variable `{name}`"), target.span))
            }
            "if" => {
                let (cond, then, otherwise) = match args {
                    [cond, then] => (cond, then, None),
                    [cond, then, otherwise] => (cond, then, Some(otherwise)),
                    _ => return Err(malformed("if", "(if cond then [else])", span)),
                };
                let cond = self.expect(cond, &Type::Bool)?;
                let (then, then_ty) = self.scoped(|this| this.lower_boxed(then))?;
                let Some(otherwise) = otherwise else {
                    return Ok((
                        Code::If {
                            cond,
                            then,
                            otherwise: None,
                        },
                        Type::Unit,
                    ));
                };
                let (otherwise, else_ty) = self.scoped(|this| this.lower_boxed(otherwise))?;
                let ty = if then_ty == else_ty || (then_ty.is_integer() && else_ty.is_integer()) {
                    then_ty
                } else {
                    Type::Unit
                };
                Ok((
                    Code::If {
                        cond,
                        then,
                        otherwise: Some(otherwise),
                    },
                    ty,
                ))
            }
            "while" => {
                let Some((cond, body)) = args.split_first() else {
                    return Err(malformed("while", "(while cond body ...)", span));
                };
                let cond = self.expect(cond, &Type::Bool)?;
                let (body, _) = self.lower_sequence(body)?;
                Ok((
                    Code::While {
                        cond,
                        body: Box::new(body),
                    },
                    Type::Unit,
                ))
            }
            "and" | "or" => {
                let [first, rest @ ..] = args else {
                    return Err(malformed(op, &format!("({op} a b ...)"), span));
                };
                if rest.is_empty() {
                    return Err(malformed(op, &format!("({op} a b ...)"), span));
                }
                let mut code = self.expect(first, &Type::Bool)?;
                for next in rest {
                    let next = self.expect(next, &Type::Bool)?;
                    code = Box::new(if op == "and" {
                        Code::And(code, next)
                    } else {
                        Code::Or(code, next)
                    });
                }
                Ok((*code, Type::Bool))
            }
            "not" => {
                let [value] = args else {
                    return Err(malformed("not", "(not value)", span));
                };
                Ok((Code::Not(self.expect(value, &Type::Bool)?), Type::Bool))
            }
            "sizeof" => {
                let [ty] = args else {
                    return Err(malformed("sizeof", "(sizeof Type)", span));
                };
                let ty = self.ctx.resolve_type(ty)?;
                Ok((Code::Const(Value::Int(ty.size() as i64)), Type::U64))
            }
            "zeroed" => {
                let [ty] = args else {
                    return Err(malformed("zeroed", "(zeroed Type)", span));
                };
                let ty = self.ctx.resolve_type(ty)?;
                Ok((Code::Const(Value::zeroed(&ty)), ty))
            }
            "field" => {
                let [base, name] = args else {
                    return Err(malformed("field", "(field pointer name)", span));
                };
                let (base_code, pointee) = self.expect_pointer(base)?;
                let Some(def) = pointee.as_struct() else {
                    return Err(error(
                        format!("`field` needs a pointer to a struct, found (ptr {pointee})"),
                        base.span,
                    ));
                };
                let field_name = self.field_name(name)?;
                let Some(field) = def.field(field_name) else {
                    return Err(unknown_field(def, field_name, name.span));
                };
                Ok((
                    Code::FieldPtr {
                        base: base_code,
                        offset: field.offset,
                        target: field.ty.clone(),
                    },
                    Type::Ptr(Box::new(field.ty.clone())),
                ))
            }
            "." => {
                let [base, name] = args else {
                    return Err(malformed(".", "(. value name)", span));
                };
                let (base_code, ty) = self.lower_boxed(base)?;
                let Some(def) = ty.as_struct() else {
                    return Err(error(format!("`.` needs a struct value, found {ty}"), base.span)
                        .with_help("use `(load (field pointer name))` to read through a pointer"));
                };
                let field_name = self.field_name(name)?;
                let (Some(index), Some(field)) = (def.field_index(field_name), def.field(field_name))
                else {
                    return Err(unknown_field(def, field_name, name.span));
                };
                Ok((
                    Code::FieldGet {
                        base: base_code,
                        index,
                    },
                    field.ty.clone(),
                ))
            }
            "make" => {
                let Some((ty_expr, values)) = args.split_first() else {
                    return Err(malformed("make", "(make Struct value ...)", span));
                };
                let ty = self.ctx.resolve_type(ty_expr)?;
                let Type::Struct(def) = &ty else {
                    return Err(error(format!("`make` needs a struct type, found {ty}"), ty_expr.span));
                };
                let layout_fields = def.layout().map(|layout| layout.fields.as_slice()).unwrap_or_default();
                if layout_fields.len() != values.len() {
                    return Err(error(
                        format!(
                            "`{}` has {} fields but {} values were supplied",
                            def.name,
                            layout_fields.len(),
                            values.len()
                        ),
                        span,
                    ));
                }
                let mut fields = Vec::with_capacity(values.len());
                for (field, value) in layout_fields.iter().zip(values) {
                    fields.push(*self.expect(value, &field.ty)?);
                }
                Ok((
                    Code::Make {
                        ty: def.clone(),
                        fields,
                    },
                    ty.clone(),
                ))
            }
            "load" => {
                let [ptr] = args else {
                    return Err(malformed("load", "(load pointer)", span));
                };
                let (ptr, ty) = self.expect_storable_pointer(ptr)?;
                Ok((Code::Load { ptr, ty: ty.clone() }, ty))
            }
            "store" => {
                let [ptr, value] = args else {
                    return Err(malformed("store", "(store pointer value)", span));
                };
                let (ptr, ty) = self.expect_storable_pointer(ptr)?;
                let value = self.expect(value, &ty)?;
                Ok((Code::Store { ptr, value, ty }, Type::Unit))
            }
            "cast" => {
                let [ty_expr, value] = args else {
                    return Err(malformed("cast", "(cast Type value)", span));
                };
                let to = self.ctx.resolve_type(ty_expr)?;
                let (value_code, from) = self.lower_boxed(value)?;
                if !castable(&from, &to) {
                    return Err(error(format!("cannot cast {from} to {to}"), span));
                }
                Ok((
                    Code::Cast {
                        value: value_code,
                        to: to.clone(),
                    },
                    to,
                ))
            }
            "offset" => {
                let [ptr, count] = args else {
                    return Err(malformed("offset", "(offset pointer count)", span));
                };
                let (ptr, pointee) = self.expect_pointer(ptr)?;
                let (count, _) = self.expect_integer(count)?;
                let stride = pointee.size();
                Ok((
                    Code::Offset { ptr, count, stride },
                    Type::Ptr(Box::new(pointee)),
                ))
            }
            "addr" => {
                let [ptr] = args else {
                    return Err(malformed("addr", "(addr pointer)", span));
                };
                let (ptr, _) = self.expect_pointer(ptr)?;
                Ok((Code::Addr(ptr), Type::U64))
            }
            "seq" => {
                let Some((ty_expr, items)) = args.split_first() else {
                    return Err(malformed("seq", "(seq Type item ...)", span));
                };
                let elem = self.ctx.resolve_type(ty_expr)?;
                if !elem.is_storable() {
                    return Err(error(format!("sequences cannot hold {elem}"), ty_expr.span));
                }
                let mut codes = Vec::with_capacity(items.len());
                for item in items {
                    codes.push(*self.expect(item, &elem)?);
                }
                Ok((
                    Code::SeqLit {
                        elem: elem.clone(),
                        items: codes,
                    },
                    Type::Seq(Box::new(elem)),
                ))
            }
            "len" => {
                let [seq] = args else {
                    return Err(malformed("len", "(len sequence)", span));
                };
                let (code, ty) = self.lower_boxed(seq)?;
                if !matches!(ty, Type::Seq(_)) {
                    return Err(error(format!("`len` needs a sequence, found {ty}"), seq.span));
                }
                Ok((Code::SeqLen(code), Type::U64))
            }
            "seq_copy" => {
                let [dst, seq] = args else {
                    return Err(malformed("seq_copy", "(seq_copy pointer sequence)", span));
                };
                let (dst, pointee) = self.expect_pointer(dst)?;
                let (seq_code, seq_ty) = self.lower_boxed(seq)?;
                match &seq_ty {
                    Type::Seq(elem) if **elem == pointee => {}
                    other => {
                        return Err(error(
                            format!("cannot copy {other} into (ptr {pointee})"),
                            seq.span,
                        ));
                    }
                }
                Ok((Code::SeqCopy { dst, seq: seq_code }, Type::Unit))
            }
            _ => self.lower_call(op, head, args, span),
        }
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        args: &[Expr],
        expr: &Expr,
    ) -> LowerResult<(Code, Type)> {
        let (left, right) = match args {
            [operand] if op == BinaryOp::Sub => {
                let (code, ty) = self.expect_integer(operand)?;
                let zero = Box::new(Code::Const(Value::Int(0)));
                return Ok((Code::Binary(op, zero, code), ty));
            }
            [left, right] => (left, right),
            _ => return Err(error("binary operators take exactly two operands", expr.span)),
        };
        let (left_code, left_ty) = self.lower_boxed(left)?;
        let (right_code, right_ty) = self.lower_boxed(right)?;
        let ty = match op {
            BinaryOp::Eq | BinaryOp::Ne => {
                if !comparable(&left_ty, &right_ty) {
                    return Err(error(format!("cannot compare {left_ty} with {right_ty}"), expr.span));
                }
                Type::Bool
            }
            _ => {
                for (operand, ty) in [(left, &left_ty), (right, &right_ty)] {
                    if !ty.is_integer() {
                        return Err(error(format!("expected an integer, found {ty}"), operand.span));
                    }
                }
                if op.is_arithmetic() {
                    left_ty
                } else {
                    Type::Bool
                }
            }
        };
        Ok((Code::Binary(op, left_code, right_code), ty))
    }

    fn lower_call(
        &mut self,
        name: &str,
        head: &Expr,
        args: &[Expr],
        span: Span,
    ) -> LowerResult<(Code, Type)> {
        let Some((callee, params, ret)) = self.ctx.resolve_function(name) else {
            return Err(error(format!("unknown function `{name}`"), head.span));
        };
        if params.len() != args.len() {
            return Err(error(
                format!(
                    "`{name}` takes {} argument{} but {} {} supplied",
                    params.len(),
                    if params.len() == 1 { "" } else { "s" },
                    args.len(),
                    if args.len() == 1 { "was" } else { "were" }
                ),
                span,
            ));
        }
        let mut codes = Vec::with_capacity(args.len());
        for ((param, ty), arg) in params.iter().zip(args) {
            let (code, found) = self.lower(arg)?;
            if !assignable(ty, &found) {
                return Err(error(
                    format!("argument `{param}` of `{name}` expects {ty}, found {found}"),
                    arg.span,
                ));
            }
            codes.push(code);
        }
        Ok((
            Code::Call {
                callee,
                args: codes,
            },
            ret,
        ))
    }
}

fn unknown_field(def: &StructType, field: &str, span: Span) -> LowerError {
    let known = def
        .layout()
        .map(|layout| {
            layout
                .fields
                .iter()
                .map(|field| field.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        })
        .unwrap_or_default();
    error(format!("`{}` has no field `{field}`", def.name), span)
        .with_help(format!("fields are: {known}"))
}
