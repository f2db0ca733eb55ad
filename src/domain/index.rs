/// Package symbol index.
/// Read-only snapshot of declarations and declared types, built once before
/// traversal so recognizers can resolve identifiers while the tree is being
/// mutated.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::domain::imports::Imports;
use crate::domain::package::Package;
use crate::domain::recognizer;
use crate::domain::syntax::{
    for_each_expr, for_each_stmt, AssignOp, Decl, Expr, ExprKind, Field, FuncDecl, GenDecl,
    GenKeyword, Stmt, StmtKind,
};

pub const NET_HTTP: &str = "net/http";

/// Declared type of an expression, as far as the index can tell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    /// `path` is the import path, or `None` for a type of this package.
    Named { path: Option<String>, name: String },
    Pointer(Box<TypeRef>),
    Unknown,
}

impl TypeRef {
    pub fn from_type_expr(expr: &Expr, imports: &Imports) -> TypeRef {
        match &expr.unparen().kind {
            ExprKind::Ident(name) => TypeRef::Named {
                path: None,
                name: name.clone(),
            },
            ExprKind::Selector { x, sel } => match x.as_ident().and_then(|a| imports.path_of(a)) {
                Some(path) => TypeRef::Named {
                    path: Some(path.to_string()),
                    name: sel.clone(),
                },
                None => TypeRef::Unknown,
            },
            ExprKind::Star(inner) => TypeRef::Pointer(Box::new(Self::from_type_expr(inner, imports))),
            _ => TypeRef::Unknown,
        }
    }

    pub fn http(name: &str) -> TypeRef {
        TypeRef::Named {
            path: Some(NET_HTTP.to_string()),
            name: name.to_string(),
        }
    }

    /// Strips one level of pointer indirection.
    pub fn deref(&self) -> &TypeRef {
        match self {
            TypeRef::Pointer(inner) => inner,
            other => other,
        }
    }

    /// True for `http.<name>` exactly, without indirection.
    pub fn is_http(&self, name: &str) -> bool {
        matches!(self, TypeRef::Named { path: Some(p), name: n } if p == NET_HTTP && n == name)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, TypeRef::Unknown)
    }
}

#[derive(Debug, Clone)]
pub struct HandlerInfo {
    /// Name of the `*http.Request` parameter, unless blank or unnamed.
    pub request_param: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FunctionInfo {
    pub key: String,
    pub name: String,
    pub file: usize,
    pub line: usize,
    pub has_receiver: bool,
    pub variadic: bool,
    pub results: Vec<TypeRef>,
    pub handler: Option<HandlerInfo>,
    /// Parameters and locals; `Unknown` when bindings disagree.
    locals: HashMap<String, TypeRef>,
}

impl FunctionInfo {
    pub fn local(&self, name: &str) -> Option<&TypeRef> {
        self.locals.get(name)
    }
}

#[derive(Debug, Default)]
pub struct PackageIndex {
    functions: BTreeMap<String, FunctionInfo>,
    structs: HashMap<String, HashMap<String, TypeRef>>,
    globals: HashMap<String, TypeRef>,
    value_refs: BTreeSet<String>,
    entry: Option<String>,
}

impl PackageIndex {
    /// Index `package`. `entry_function` names the program entry point; it is
    /// only honoured in package `main`.
    pub fn build(package: &Package, entry_function: &str) -> Self {
        let mut index = PackageIndex::default();

        // Pass 1: types, package variables and signatures.
        for file in &package.files {
            for decl in &file.decls {
                match decl {
                    Decl::Gen { decl, .. } => index.index_gen_decl(decl, &file.imports),
                    Decl::Func(func) => {
                        for_each_stmt(&func.body.stmts, &mut |stmt| {
                            if let StmtKind::Decl(decl) = &stmt.kind {
                                if decl.keyword == GenKeyword::Type {
                                    index.index_gen_decl(decl, &file.imports);
                                }
                            }
                        });
                    }
                }
            }
        }
        for (file_idx, func) in package.functions() {
            let imports = &package.files[file_idx].imports;
            let info = FunctionInfo {
                key: func.key(),
                name: func.name.clone(),
                file: file_idx,
                line: func.line,
                has_receiver: func.receiver.is_some(),
                variadic: func.sig.is_variadic(),
                results: func
                    .sig
                    .flat_results()
                    .iter()
                    .map(|(_, field)| TypeRef::from_type_expr(&field.ty, imports))
                    .collect(),
                handler: handler_info(func, imports),
                locals: HashMap::new(),
            };
            index.functions.insert(info.key.clone(), info);
        }

        // Pass 2: local bindings, which may refer to package signatures.
        for (file_idx, func) in package.functions() {
            let imports = &package.files[file_idx].imports;
            let locals = index.infer_locals(func, imports);
            if let Some(info) = index.functions.get_mut(&func.key()) {
                info.locals = locals;
            }
        }

        index.value_refs = collect_value_refs(package, &index.functions);
        if package.name == "main" && index.functions.contains_key(entry_function) {
            index.entry = Some(entry_function.to_string());
        }
        index
    }

    pub fn function(&self, key: &str) -> Option<&FunctionInfo> {
        self.functions.get(key)
    }

    pub fn functions(&self) -> impl Iterator<Item = &FunctionInfo> {
        self.functions.values()
    }

    pub fn entry(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn is_entry(&self, key: &str) -> bool {
        self.entry.as_deref() == Some(key)
    }

    pub fn is_handler(&self, key: &str) -> bool {
        self.function(key).is_some_and(|f| f.handler.is_some())
    }

    /// Used as a value or named inside text the model does not parse.
    pub fn is_referenced_opaquely(&self, key: &str) -> bool {
        self.value_refs.contains(key)
    }

    /// A plain function whose signature can gain a trailing parameter without
    /// breaking a reference the analysis cannot see.
    pub fn is_threadable(&self, key: &str) -> bool {
        match self.function(key) {
            Some(info) => {
                !info.has_receiver
                    && !info.variadic
                    && info.handler.is_none()
                    && !self.is_entry(key)
                    && info.name != "init"
                    && !self.value_refs.contains(key)
            }
            None => false,
        }
    }

    /// Resolves the declared type of `expr` inside `function`.
    pub fn type_of(&self, expr: &Expr, function: Option<&str>, imports: &Imports) -> TypeRef {
        let info = function.and_then(|key| self.functions.get(key));
        self.type_in(expr, info.map(|f| &f.locals), imports)
    }

    fn type_in(
        &self,
        expr: &Expr,
        locals: Option<&HashMap<String, TypeRef>>,
        imports: &Imports,
    ) -> TypeRef {
        let is_local = |name: &str| locals.is_some_and(|l| l.contains_key(name));
        match &expr.unparen().kind {
            ExprKind::Ident(name) => locals
                .and_then(|l| l.get(name))
                .or_else(|| self.globals.get(name))
                .cloned()
                .unwrap_or(TypeRef::Unknown),
            ExprKind::Selector { x, sel } => {
                if let Some(alias) = x.as_ident() {
                    if !is_local(alias) && !self.globals.contains_key(alias) {
                        if let Some(path) = imports.path_of(alias) {
                            return package_value_type(path, sel);
                        }
                    }
                }
                match self.type_in(x, locals, imports).deref() {
                    TypeRef::Named { path: None, name } => self
                        .structs
                        .get(name)
                        .and_then(|fields| fields.get(sel))
                        .cloned()
                        .unwrap_or(TypeRef::Unknown),
                    _ => TypeRef::Unknown,
                }
            }
            ExprKind::Unary { op, x } if op == "&" => {
                match self.type_in(x, locals, imports) {
                    TypeRef::Unknown => TypeRef::Unknown,
                    inner => TypeRef::Pointer(Box::new(inner)),
                }
            }
            ExprKind::CompositeLit { ty: Some(ty), .. } => TypeRef::from_type_expr(ty, imports),
            ExprKind::Call { fun, args, .. } => match fun.as_ident() {
                Some("new") if args.len() == 1 => {
                    match TypeRef::from_type_expr(&args[0], imports) {
                        TypeRef::Unknown => TypeRef::Unknown,
                        inner => TypeRef::Pointer(Box::new(inner)),
                    }
                }
                _ => {
                    let mut results = self.call_results(fun, locals, imports);
                    if results.len() == 1 {
                        results.remove(0)
                    } else {
                        TypeRef::Unknown
                    }
                }
            },
            _ => TypeRef::Unknown,
        }
    }

    /// Result types of a call to a package function or a known function of
    /// an imported package.
    fn call_results(
        &self,
        fun: &Expr,
        locals: Option<&HashMap<String, TypeRef>>,
        imports: &Imports,
    ) -> Vec<TypeRef> {
        let is_local = |name: &str| locals.is_some_and(|l| l.contains_key(name));
        match &fun.unparen().kind {
            ExprKind::Ident(name) if !is_local(name) => self
                .functions
                .get(name)
                .map(|f| f.results.clone())
                .unwrap_or_default(),
            ExprKind::Selector { x, sel } => match x.as_ident() {
                Some(alias) if !is_local(alias) && !self.globals.contains_key(alias) => imports
                    .path_of(alias)
                    .map(|path| package_func_results(path, sel))
                    .unwrap_or_default(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    fn index_gen_decl(&mut self, decl: &GenDecl, imports: &Imports) {
        for spec in &decl.types {
            let fields = field_types(&spec.fields, imports);
            self.structs.insert(spec.name.clone(), fields);
        }
        if decl.keyword != GenKeyword::Var {
            return;
        }
        for spec in &decl.values {
            for (i, name) in spec.names.iter().enumerate() {
                let ty = match &spec.ty {
                    Some(ty) => TypeRef::from_type_expr(ty, imports),
                    None if spec.values.len() == spec.names.len() => {
                        self.type_in(&spec.values[i], None, imports)
                    }
                    None => TypeRef::Unknown,
                };
                self.globals.insert(name.clone(), ty);
            }
        }
    }

    fn infer_locals(&self, func: &FuncDecl, imports: &Imports) -> HashMap<String, TypeRef> {
        let mut locals: HashMap<String, TypeRef> = HashMap::new();
        for (name, field) in func.sig.flat_params() {
            if let Some(name) = name {
                bind(&mut locals, name, TypeRef::from_type_expr(&field.ty, imports));
            }
        }
        if let Some(recv) = &func.receiver {
            if let Some(name) = receiver_name(&recv.text) {
                let ty = TypeRef::Named {
                    path: None,
                    name: recv.type_name.clone(),
                };
                let ty = if recv.text.contains('*') {
                    TypeRef::Pointer(Box::new(ty))
                } else {
                    ty
                };
                bind(&mut locals, &name, ty);
            }
        }

        for_each_stmt(&func.body.stmts, &mut |stmt| {
            self.bind_stmt(stmt, imports, &mut locals);
            for_each_expr(stmt, &mut |expr| {
                if let ExprKind::FuncLit(lit) = &expr.kind {
                    for (name, field) in lit.sig.flat_params() {
                        if let Some(name) = name {
                            bind(&mut locals, name, TypeRef::from_type_expr(&field.ty, imports));
                        }
                    }
                }
            });
        });
        locals
    }

    fn bind_stmt(&self, stmt: &Stmt, imports: &Imports, locals: &mut HashMap<String, TypeRef>) {
        match &stmt.kind {
            StmtKind::Assign {
                lhs,
                op: AssignOp::Define,
                rhs,
            } => {
                if lhs.len() == rhs.len() {
                    for (l, r) in lhs.iter().zip(rhs) {
                        if let Some(name) = l.as_ident() {
                            let ty = self.type_in(r, Some(&*locals), imports);
                            bind(locals, name, ty);
                        }
                    }
                } else {
                    let results = match rhs.first().and_then(|r| r.as_call()) {
                        Some((fun, _)) => self.call_results(fun, Some(&*locals), imports),
                        None => Vec::new(),
                    };
                    for (i, l) in lhs.iter().enumerate() {
                        if let Some(name) = l.as_ident() {
                            let ty = if results.len() == lhs.len() {
                                results[i].clone()
                            } else {
                                TypeRef::Unknown
                            };
                            bind(locals, name, ty);
                        }
                    }
                }
            }
            StmtKind::Decl(decl) if decl.keyword == GenKeyword::Var => {
                for spec in &decl.values {
                    for (i, name) in spec.names.iter().enumerate() {
                        let ty = match &spec.ty {
                            Some(ty) => TypeRef::from_type_expr(ty, imports),
                            None if spec.values.len() == spec.names.len() => {
                                self.type_in(&spec.values[i], Some(&*locals), imports)
                            }
                            None => TypeRef::Unknown,
                        };
                        bind(locals, name, ty);
                    }
                }
            }
            _ => {}
        }
    }
}

/// Records a binding; conflicting bindings of one name degrade to `Unknown`.
fn bind(locals: &mut HashMap<String, TypeRef>, name: &str, ty: TypeRef) {
    if name == "_" {
        return;
    }
    match locals.get(name) {
        Some(existing) if *existing != ty => {
            locals.insert(name.to_string(), TypeRef::Unknown);
        }
        Some(_) => {}
        None => {
            locals.insert(name.to_string(), ty);
        }
    }
}

fn field_types(fields: &[Field], imports: &Imports) -> HashMap<String, TypeRef> {
    let mut out = HashMap::new();
    for field in fields {
        let ty = TypeRef::from_type_expr(&field.ty, imports);
        for name in &field.names {
            out.insert(name.clone(), ty.clone());
        }
    }
    out
}

/// Types of the package-level values of imported packages the analysis knows.
fn package_value_type(path: &str, name: &str) -> TypeRef {
    match (path, name) {
        (NET_HTTP, "DefaultClient") => TypeRef::Pointer(Box::new(TypeRef::http("Client"))),
        (NET_HTTP, "DefaultServeMux") => TypeRef::Pointer(Box::new(TypeRef::http("ServeMux"))),
        _ => TypeRef::Unknown,
    }
}

/// Result types of the constructors of imported packages the analysis knows.
fn package_func_results(path: &str, name: &str) -> Vec<TypeRef> {
    let pointer = |name: &str| TypeRef::Pointer(Box::new(TypeRef::http(name)));
    let error = TypeRef::Named {
        path: None,
        name: "error".to_string(),
    };
    match (path, name) {
        (NET_HTTP, "NewServeMux") => vec![pointer("ServeMux")],
        (NET_HTTP, "NewRequest" | "NewRequestWithContext") => vec![pointer("Request"), error],
        _ => Vec::new(),
    }
}

fn receiver_name(text: &str) -> Option<String> {
    let inner = text.trim().trim_start_matches('(').trim_end_matches(')').trim();
    let mut parts = inner.split_whitespace();
    let first = parts.next()?;
    parts.next()?;
    Some(first.to_string())
}

fn handler_info(func: &FuncDecl, imports: &Imports) -> Option<HandlerInfo> {
    if func.receiver.is_some() || !recognizer::is_http_handler(&func.sig, imports) {
        return None;
    }
    let request_param = func
        .sig
        .flat_params()
        .get(1)
        .and_then(|(name, _)| *name)
        .filter(|name| *name != "_")
        .map(str::to_string);
    Some(HandlerInfo { request_param })
}

/// Function names used other than as the callee of a call, or mentioned in
/// opaque text where call sites cannot be rewritten.
fn collect_value_refs(
    package: &Package,
    functions: &BTreeMap<String, FunctionInfo>,
) -> BTreeSet<String> {
    let mut refs = BTreeSet::new();
    let mut note_text = |text: &str, refs: &mut BTreeSet<String>| {
        for m in identifier_pattern().find_iter(text) {
            if functions.contains_key(m.as_str()) {
                refs.insert(m.as_str().to_string());
            }
        }
    };

    for file in &package.files {
        for decl in &file.decls {
            match decl {
                Decl::Gen { decl, .. } => note_text(&decl.text, &mut refs),
                Decl::Func(func) => {
                    for_each_stmt(&func.body.stmts, &mut |stmt| {
                        match &stmt.kind {
                            StmtKind::Raw(text) => note_text(text, &mut refs),
                            StmtKind::Decl(decl) => note_text(&decl.text, &mut refs),
                            StmtKind::For { header, .. } => note_text(header, &mut refs),
                            StmtKind::Switch { header, clauses } => {
                                note_text(header, &mut refs);
                                for clause in clauses {
                                    note_text(&clause.header, &mut refs);
                                }
                            }
                            _ => {}
                        }
                    });
                    for stmt in &func.body.stmts {
                        collect_expr_refs(stmt, functions, &mut refs, &mut note_text);
                    }
                }
            }
        }
    }
    refs
}

fn collect_expr_refs(
    stmt: &Stmt,
    functions: &BTreeMap<String, FunctionInfo>,
    refs: &mut BTreeSet<String>,
    note_text: &mut dyn FnMut(&str, &mut BTreeSet<String>),
) {
    let mut callees: Vec<&Expr> = Vec::new();
    let mut idents: Vec<&Expr> = Vec::new();
    for_each_expr(stmt, &mut |expr| match &expr.kind {
        ExprKind::Call { fun, .. } => callees.push(fun.as_ref()),
        ExprKind::Ident(_) => idents.push(expr),
        ExprKind::Raw(text) => note_text(text, refs),
        _ => {}
    });
    for ident in idents {
        let is_callee = callees.iter().any(|c| std::ptr::eq(*c, ident));
        if let Some(name) = ident.as_ident() {
            if !is_callee && functions.contains_key(name) {
                refs.insert(name.to_string());
            }
        }
    }
}

fn identifier_pattern() -> &'static Regex {
    static IDENT: OnceLock<Regex> = OnceLock::new();
    IDENT.get_or_init(|| Regex::new(r"[\p{L}_][\p{L}\p{Nd}_]*").expect("identifier pattern is valid"))
}
