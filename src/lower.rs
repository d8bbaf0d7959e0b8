//! Lowering from the oxc AST into the owned script IR.
//!
//! Build scripts get their module syntax rewritten on the way down:
//! imports become reads of pre-loaded module records, exports become plain
//! declarations plus a [`PublicAlias`].

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, ArrayExpressionElement, ArrowFunctionExpression, AssignmentTarget, BindingPattern,
    CallExpression, ChainElement, Class, ClassElement, ComputedMemberExpression, Declaration,
    ExportDefaultDeclarationKind, Expression, ForStatementInit, ForStatementLeft,
    FormalParameters, Function, ImportDeclaration, ImportDeclarationSpecifier,
    MethodDefinitionKind, ModuleExportName, ObjectPropertyKind, PropertyKey, PropertyKind,
    SimpleAssignmentTarget, Statement, StaticMemberExpression, TemplateLiteral,
    VariableDeclaration, VariableDeclarationKind,
};
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use std::rc::Rc;

use crate::error::ScriptError;
use crate::script_ir::{self as ir, Name, PublicAlias};
use crate::value::{number_to_string, Value};

/// Local that receives `export default <expression>`.
pub const DEFAULT_EXPORT_LOCAL: &str = "__default";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ModuleSyntax {
    /// Template expressions: `import()` is not available.
    Forbidden,
    /// Plain `<script build>`: import/export declarations are an error.
    Rejected,
    /// `<script build type="module">` and JS modules.
    Rewritten,
}

#[derive(Debug, Default)]
pub struct LoweredScript {
    pub body: Vec<ir::Stmt>,
    pub aliases: Vec<PublicAlias>,
    /// Resolved module URLs, first-seen order, deduplicated.
    pub modules: Vec<String>,
    /// Source text of re-exports that were dropped.
    pub reexports: Vec<String>,
}

fn source_type() -> SourceType {
    SourceType::default().with_module(true)
}

fn join_errors<E: std::fmt::Display>(errors: &[E]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn name(atom: &str) -> Name {
    Rc::from(atom)
}

/// Parses and lowers a template expression (the text between `{{ }}`).
pub fn lower_expression(source: &str) -> Result<ir::Expr, ScriptError> {
    let allocator = Allocator::default();
    let expr = Parser::new(&allocator, source, source_type())
        .parse_expression()
        .map_err(|errors| ScriptError::Syntax(join_errors(&errors)))?;
    let resolve = |s: &str| s.to_string();
    let mut lowerer = Lowerer::new(source, ModuleSyntax::Forbidden, &resolve);
    lowerer.expr(&expr)
}

/// Parses and lowers a build script or JS module.
///
/// `resolve_specifier` maps import specifiers to the URLs handed to the
/// module loader.
pub fn lower_script(
    source: &str,
    module: bool,
    resolve_specifier: &dyn Fn(&str) -> String,
) -> Result<LoweredScript, ScriptError> {
    let allocator = Allocator::default();
    let ret = Parser::new(&allocator, source, source_type()).parse();
    if !ret.errors.is_empty() {
        return Err(ScriptError::Syntax(join_errors(&ret.errors)));
    }

    let syntax = if module {
        ModuleSyntax::Rewritten
    } else {
        ModuleSyntax::Rejected
    };
    let mut lowerer = Lowerer::new(source, syntax, resolve_specifier);

    let mut imports = Vec::new();
    let mut body = Vec::new();
    for stmt in &ret.program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                lowerer.require_module_syntax("import declarations")?;
                imports.push(lowerer.import_declaration(decl)?);
            }
            _ => body.push(lowerer.module_item(stmt)?),
        }
    }

    // Imports are hoisted ahead of the first statement.
    imports.extend(body);
    Ok(LoweredScript {
        body: imports,
        aliases: lowerer.aliases,
        modules: lowerer.modules,
        reexports: lowerer.reexports,
    })
}

struct Lowerer<'s> {
    source: &'s str,
    syntax: ModuleSyntax,
    resolve_specifier: &'s dyn Fn(&str) -> String,
    aliases: Vec<PublicAlias>,
    modules: Vec<String>,
    reexports: Vec<String>,
}

impl<'s> Lowerer<'s> {
    fn new(
        source: &'s str,
        syntax: ModuleSyntax,
        resolve_specifier: &'s dyn Fn(&str) -> String,
    ) -> Self {
        Self {
            source,
            syntax,
            resolve_specifier,
            aliases: Vec::new(),
            modules: Vec::new(),
            reexports: Vec::new(),
        }
    }

    fn snippet<T: GetSpan>(&self, node: &T) -> &'s str {
        let span = node.span();
        self.source
            .get(span.start as usize..span.end as usize)
            .unwrap_or("")
    }

    fn unsupported<T: GetSpan>(&self, what: &str, node: &T) -> ScriptError {
        ScriptError::Unsupported(format!("{} `{}`", what, self.snippet(node)))
    }

    fn require_module_syntax(&self, what: &str) -> Result<(), ScriptError> {
        if self.syntax == ModuleSyntax::Rewritten {
            Ok(())
        } else {
            Err(ScriptError::Syntax(format!(
                "{} require a build script with type=\"module\"",
                what
            )))
        }
    }

    fn request_module(&mut self, specifier: &str) -> Name {
        let url = (self.resolve_specifier)(specifier);
        if !self.modules.contains(&url) {
            self.modules.push(url.clone());
        }
        name(&url)
    }

    fn alias(&mut self, local: &str, exported: &str) {
        self.aliases.push(PublicAlias {
            local: local.to_string(),
            exported: exported.to_string(),
        });
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // MODULE ITEMS
    // ═══════════════════════════════════════════════════════════════════════════

    fn import_declaration(&mut self, decl: &ImportDeclaration<'_>) -> Result<ir::Stmt, ScriptError> {
        let url = self.request_module(decl.source.value.as_str());
        let Some(specifiers) = &decl.specifiers else {
            return Ok(ir::Stmt::Expr(ir::Expr::LoadModule(url)));
        };

        let mut decls = Vec::new();
        let mut named = Vec::new();
        for specifier in specifiers {
            match specifier {
                ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                    decls.push(ir::Declarator {
                        pattern: ir::Pattern::Ident(name(s.local.name.as_str())),
                        init: Some(ir::Expr::Member {
                            object: Box::new(ir::Expr::LoadModule(url.clone())),
                            property: Box::new(ir::Property::Static(name("default"))),
                            optional: false,
                        }),
                    });
                }
                ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                    decls.push(ir::Declarator {
                        pattern: ir::Pattern::Ident(name(s.local.name.as_str())),
                        init: Some(ir::Expr::LoadModule(url.clone())),
                    });
                }
                ImportDeclarationSpecifier::ImportSpecifier(s) => {
                    named.push((
                        ir::PropertyKey::Static(name(export_name(&s.imported))),
                        ir::Pattern::Ident(name(s.local.name.as_str())),
                    ));
                }
            }
        }
        if !named.is_empty() {
            decls.push(ir::Declarator {
                pattern: ir::Pattern::Object {
                    props: named,
                    rest: None,
                },
                init: Some(ir::Expr::LoadModule(url)),
            });
        }
        Ok(ir::Stmt::Declare {
            kind: ir::DeclKind::Const,
            decls,
        })
    }

    fn module_item(&mut self, stmt: &Statement<'_>) -> Result<ir::Stmt, ScriptError> {
        match stmt {
            Statement::ExportNamedDeclaration(export) => {
                self.require_module_syntax("export declarations")?;
                if export.source.is_some() {
                    self.reexports.push(self.snippet(stmt).to_string());
                    return Ok(ir::Stmt::Empty);
                }
                if let Some(declaration) = &export.declaration {
                    let lowered = self.declaration(declaration)?;
                    let mut names = Vec::new();
                    declared_names(&lowered, &mut names);
                    for n in names {
                        self.alias(&n, &n);
                    }
                    return Ok(lowered);
                }
                for specifier in &export.specifiers {
                    let local = export_name(&specifier.local).to_string();
                    let exported = export_name(&specifier.exported).to_string();
                    self.alias(&local, &exported);
                }
                Ok(ir::Stmt::Empty)
            }
            Statement::ExportDefaultDeclaration(export) => {
                self.require_module_syntax("export declarations")?;
                match &export.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(func) => {
                        let mut def = self.function(func)?;
                        let local = def
                            .name
                            .clone()
                            .unwrap_or_else(|| name(DEFAULT_EXPORT_LOCAL));
                        def.name = Some(local.clone());
                        self.alias(&local, "default");
                        Ok(ir::Stmt::Function(Rc::new(def)))
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(class) => {
                        let mut def = self.class(class)?;
                        let local = def
                            .name
                            .clone()
                            .unwrap_or_else(|| name(DEFAULT_EXPORT_LOCAL));
                        def.name = Some(local.clone());
                        self.alias(&local, "default");
                        Ok(ir::Stmt::Class(Rc::new(def)))
                    }
                    other => {
                        let expr = match other.as_expression() {
                            Some(e) => self.expr(e)?,
                            None => return Err(self.unsupported("default export", stmt)),
                        };
                        self.alias(DEFAULT_EXPORT_LOCAL, "default");
                        Ok(ir::Stmt::Declare {
                            kind: ir::DeclKind::Const,
                            decls: vec![ir::Declarator {
                                pattern: ir::Pattern::Ident(name(DEFAULT_EXPORT_LOCAL)),
                                init: Some(expr),
                            }],
                        })
                    }
                }
            }
            Statement::ExportAllDeclaration(_) => {
                self.require_module_syntax("export declarations")?;
                self.reexports.push(self.snippet(stmt).to_string());
                Ok(ir::Stmt::Empty)
            }
            _ => self.stmt(stmt),
        }
    }

    fn declaration(&mut self, decl: &Declaration<'_>) -> Result<ir::Stmt, ScriptError> {
        match decl {
            Declaration::VariableDeclaration(var) => self.variable_declaration(var),
            Declaration::FunctionDeclaration(func) => {
                Ok(ir::Stmt::Function(Rc::new(self.function(func)?)))
            }
            Declaration::ClassDeclaration(class) => Ok(ir::Stmt::Class(Rc::new(self.class(class)?))),
            other => Err(self.unsupported("declaration", other)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // STATEMENTS
    // ═══════════════════════════════════════════════════════════════════════════

    fn stmts(&mut self, stmts: &[Statement<'_>]) -> Result<Vec<ir::Stmt>, ScriptError> {
        stmts.iter().map(|s| self.stmt(s)).collect()
    }

    fn stmt(&mut self, stmt: &Statement<'_>) -> Result<ir::Stmt, ScriptError> {
        Ok(match stmt {
            Statement::EmptyStatement(_) | Statement::DebuggerStatement(_) => ir::Stmt::Empty,
            Statement::ExpressionStatement(s) => ir::Stmt::Expr(self.expr(&s.expression)?),
            Statement::VariableDeclaration(var) => self.variable_declaration(var)?,
            Statement::FunctionDeclaration(func) => ir::Stmt::Function(Rc::new(self.function(func)?)),
            Statement::ClassDeclaration(class) => ir::Stmt::Class(Rc::new(self.class(class)?)),
            Statement::BlockStatement(block) => ir::Stmt::Block(self.stmts(&block.body)?),
            Statement::ReturnStatement(ret) => ir::Stmt::Return(match &ret.argument {
                Some(arg) => Some(self.expr(arg)?),
                None => None,
            }),
            Statement::IfStatement(s) => ir::Stmt::If {
                test: self.expr(&s.test)?,
                consequent: Box::new(self.stmt(&s.consequent)?),
                alternate: match &s.alternate {
                    Some(alt) => Some(Box::new(self.stmt(alt)?)),
                    None => None,
                },
            },
            Statement::ForStatement(s) => ir::Stmt::For {
                init: match &s.init {
                    Some(ForStatementInit::VariableDeclaration(var)) => Some(ir::ForInit::Declare(
                        Box::new(self.variable_declaration(var)?),
                    )),
                    Some(other) => match other.as_expression() {
                        Some(e) => Some(ir::ForInit::Expr(self.expr(e)?)),
                        None => return Err(self.unsupported("for initializer", stmt)),
                    },
                    None => None,
                },
                test: match &s.test {
                    Some(t) => Some(self.expr(t)?),
                    None => None,
                },
                update: match &s.update {
                    Some(u) => Some(self.expr(u)?),
                    None => None,
                },
                body: Box::new(self.stmt(&s.body)?),
            },
            Statement::ForOfStatement(s) => {
                if s.r#await {
                    return Err(self.unsupported("for await", stmt));
                }
                ir::Stmt::ForOf {
                    left: self.for_binding(&s.left)?,
                    right: self.expr(&s.right)?,
                    body: Box::new(self.stmt(&s.body)?),
                }
            }
            Statement::ForInStatement(s) => ir::Stmt::ForIn {
                left: self.for_binding(&s.left)?,
                right: self.expr(&s.right)?,
                body: Box::new(self.stmt(&s.body)?),
            },
            Statement::WhileStatement(s) => ir::Stmt::While {
                test: self.expr(&s.test)?,
                body: Box::new(self.stmt(&s.body)?),
            },
            Statement::DoWhileStatement(s) => ir::Stmt::DoWhile {
                body: Box::new(self.stmt(&s.body)?),
                test: self.expr(&s.test)?,
            },
            Statement::BreakStatement(s) => {
                ir::Stmt::Break(s.label.as_ref().map(|l| name(l.name.as_str())))
            }
            Statement::ContinueStatement(s) => {
                ir::Stmt::Continue(s.label.as_ref().map(|l| name(l.name.as_str())))
            }
            Statement::LabeledStatement(s) => ir::Stmt::Labeled {
                label: name(s.label.name.as_str()),
                body: Box::new(self.stmt(&s.body)?),
            },
            Statement::ThrowStatement(s) => ir::Stmt::Throw(self.expr(&s.argument)?),
            Statement::TryStatement(s) => {
                let (param, handler) = match &s.handler {
                    Some(clause) => {
                        let param = match &clause.param {
                            Some(p) => Some(self.binding_pattern(&p.pattern)?),
                            None => None,
                        };
                        (param, Some(self.stmts(&clause.body.body)?))
                    }
                    None => (None, None),
                };
                ir::Stmt::Try {
                    block: self.stmts(&s.block.body)?,
                    param,
                    handler,
                    finalizer: match &s.finalizer {
                        Some(f) => Some(self.stmts(&f.body)?),
                        None => None,
                    },
                }
            }
            Statement::SwitchStatement(s) => ir::Stmt::Switch {
                discriminant: self.expr(&s.discriminant)?,
                cases: s
                    .cases
                    .iter()
                    .map(|case| {
                        Ok(ir::SwitchCase {
                            test: match &case.test {
                                Some(t) => Some(self.expr(t)?),
                                None => None,
                            },
                            body: self.stmts(&case.consequent)?,
                        })
                    })
                    .collect::<Result<_, ScriptError>>()?,
            },
            Statement::ImportDeclaration(_) => {
                return Err(ScriptError::Syntax(
                    "import declarations are only allowed at the top level".to_string(),
                ))
            }
            Statement::ExportNamedDeclaration(_)
            | Statement::ExportDefaultDeclaration(_)
            | Statement::ExportAllDeclaration(_) => {
                return Err(ScriptError::Syntax(
                    "export declarations are only allowed at the top level".to_string(),
                ))
            }
            other => return Err(self.unsupported("statement", other)),
        })
    }

    fn variable_declaration(
        &mut self,
        var: &VariableDeclaration<'_>,
    ) -> Result<ir::Stmt, ScriptError> {
        let kind = match var.kind {
            VariableDeclarationKind::Var => ir::DeclKind::Var,
            VariableDeclarationKind::Let => ir::DeclKind::Let,
            VariableDeclarationKind::Const => ir::DeclKind::Const,
            _ => return Err(self.unsupported("declaration kind", var)),
        };
        let decls = var
            .declarations
            .iter()
            .map(|d| {
                Ok(ir::Declarator {
                    pattern: self.binding_pattern(&d.id)?,
                    init: match &d.init {
                        Some(init) => Some(self.expr(init)?),
                        None => None,
                    },
                })
            })
            .collect::<Result<_, ScriptError>>()?;
        Ok(ir::Stmt::Declare { kind, decls })
    }

    fn for_binding(&mut self, left: &ForStatementLeft<'_>) -> Result<ir::ForBinding, ScriptError> {
        match left {
            ForStatementLeft::VariableDeclaration(var) => {
                let ir::Stmt::Declare { kind, mut decls } = self.variable_declaration(var)? else {
                    return Err(self.unsupported("loop binding", &**var));
                };
                match decls.pop() {
                    Some(d) if decls.is_empty() => Ok(ir::ForBinding::Declare(kind, d.pattern)),
                    _ => Err(self.unsupported("loop binding", &**var)),
                }
            }
            ForStatementLeft::AssignmentTargetIdentifier(id) => Ok(ir::ForBinding::Assign(
                ir::Pattern::Ident(name(id.name.as_str())),
            )),
            other => Err(self.unsupported("loop binding", other)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // PATTERNS
    // ═══════════════════════════════════════════════════════════════════════════

    fn binding_pattern(&mut self, pattern: &BindingPattern<'_>) -> Result<ir::Pattern, ScriptError> {
        Ok(match pattern {
            BindingPattern::BindingIdentifier(id) => ir::Pattern::Ident(name(id.name.as_str())),
            BindingPattern::ObjectPattern(obj) => {
                let mut props = Vec::new();
                for prop in &obj.properties {
                    let key = self.property_key(&prop.key, prop.computed)?;
                    props.push((key, self.binding_pattern(&prop.value)?));
                }
                let rest = match &obj.rest {
                    Some(rest) => Some(Box::new(self.binding_pattern(&rest.argument)?)),
                    None => None,
                };
                ir::Pattern::Object { props, rest }
            }
            BindingPattern::ArrayPattern(arr) => {
                let mut items = Vec::new();
                for elem in &arr.elements {
                    items.push(match elem {
                        Some(p) => Some(self.binding_pattern(p)?),
                        None => None,
                    });
                }
                let rest = match &arr.rest {
                    Some(rest) => Some(Box::new(self.binding_pattern(&rest.argument)?)),
                    None => None,
                };
                ir::Pattern::Array { items, rest }
            }
            BindingPattern::AssignmentPattern(assign) => ir::Pattern::Default {
                pattern: Box::new(self.binding_pattern(&assign.left)?),
                default: Box::new(self.expr(&assign.right)?),
            },
        })
    }

    fn params(
        &mut self,
        params: &FormalParameters<'_>,
    ) -> Result<(Vec<ir::Pattern>, Option<ir::Pattern>), ScriptError> {
        let mut lowered = Vec::new();
        for item in &params.items {
            let pattern = self.binding_pattern(&item.pattern)?;
            // A default value may sit outside the pattern's own span.
            let tail = self
                .source
                .get(item.pattern.span().end as usize..item.span.end as usize)
                .unwrap_or("")
                .trim();
            let pattern = match tail.strip_prefix('=') {
                Some(default) if !matches!(pattern, ir::Pattern::Default { .. }) => {
                    ir::Pattern::Default {
                        pattern: Box::new(pattern),
                        default: Box::new(lower_expression(default.trim())?),
                    }
                }
                _ => pattern,
            };
            lowered.push(pattern);
        }
        let rest = match &params.rest {
            Some(rest) => {
                let text = self.snippet(&**rest).trim();
                let ident = text.trim_start_matches("...").trim();
                if ident.is_empty()
                    || !ident
                        .chars()
                        .all(|c| c.is_alphanumeric() || c == '_' || c == '$')
                {
                    return Err(ScriptError::Unsupported(format!(
                        "destructured rest parameter `{}`",
                        text
                    )));
                }
                Some(ir::Pattern::Ident(name(ident)))
            }
            None => None,
        };
        Ok((lowered, rest))
    }

    fn assignment_target(
        &mut self,
        target: &AssignmentTarget<'_>,
    ) -> Result<ir::Target, ScriptError> {
        match target {
            AssignmentTarget::AssignmentTargetIdentifier(id) => {
                Ok(ir::Target::Ident(name(id.name.as_str())))
            }
            AssignmentTarget::StaticMemberExpression(m) => Ok(ir::Target::Member {
                object: self.expr(&m.object)?,
                property: ir::Property::Static(name(m.property.name.as_str())),
            }),
            AssignmentTarget::ComputedMemberExpression(m) => Ok(ir::Target::Member {
                object: self.expr(&m.object)?,
                property: ir::Property::Computed(self.expr(&m.expression)?),
            }),
            other => Err(self.unsupported("assignment target", other)),
        }
    }

    fn simple_target(
        &mut self,
        target: &SimpleAssignmentTarget<'_>,
    ) -> Result<ir::Target, ScriptError> {
        match target {
            SimpleAssignmentTarget::AssignmentTargetIdentifier(id) => {
                Ok(ir::Target::Ident(name(id.name.as_str())))
            }
            SimpleAssignmentTarget::StaticMemberExpression(m) => Ok(ir::Target::Member {
                object: self.expr(&m.object)?,
                property: ir::Property::Static(name(m.property.name.as_str())),
            }),
            SimpleAssignmentTarget::ComputedMemberExpression(m) => Ok(ir::Target::Member {
                object: self.expr(&m.object)?,
                property: ir::Property::Computed(self.expr(&m.expression)?),
            }),
            other => Err(self.unsupported("update target", other)),
        }
    }

    fn property_key(
        &mut self,
        key: &PropertyKey<'_>,
        computed: bool,
    ) -> Result<ir::PropertyKey, ScriptError> {
        if !computed {
            match key {
                PropertyKey::StaticIdentifier(id) => {
                    return Ok(ir::PropertyKey::Static(name(id.name.as_str())))
                }
                PropertyKey::StringLiteral(s) => {
                    return Ok(ir::PropertyKey::Static(name(s.value.as_str())))
                }
                PropertyKey::NumericLiteral(n) => {
                    return Ok(ir::PropertyKey::Static(name(&number_to_string(n.value))))
                }
                _ => {}
            }
        }
        match key.as_expression() {
            Some(e) => Ok(ir::PropertyKey::Computed(self.expr(e)?)),
            None => Err(self.unsupported("property key", key)),
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // FUNCTIONS AND CLASSES
    // ═══════════════════════════════════════════════════════════════════════════

    fn function(&mut self, func: &Function<'_>) -> Result<ir::FunctionDef, ScriptError> {
        if func.generator {
            return Err(self.unsupported("generator function", func));
        }
        let (params, rest) = self.params(&func.params)?;
        let body = match &func.body {
            Some(body) => ir::FunctionBody::Block(self.stmts(&body.statements)?),
            None => ir::FunctionBody::Block(Vec::new()),
        };
        Ok(ir::FunctionDef {
            name: func.id.as_ref().map(|id| name(id.name.as_str())),
            params,
            rest,
            body,
            is_arrow: false,
        })
    }

    fn arrow(&mut self, func: &ArrowFunctionExpression<'_>) -> Result<ir::FunctionDef, ScriptError> {
        let (params, rest) = self.params(&func.params)?;
        let body = if func.expression {
            match func.body.statements.first() {
                Some(Statement::ExpressionStatement(s)) => {
                    ir::FunctionBody::Expr(Box::new(self.expr(&s.expression)?))
                }
                _ => ir::FunctionBody::Block(Vec::new()),
            }
        } else {
            ir::FunctionBody::Block(self.stmts(&func.body.statements)?)
        };
        Ok(ir::FunctionDef {
            name: None,
            params,
            rest,
            body,
            is_arrow: true,
        })
    }

    fn class(&mut self, class: &Class<'_>) -> Result<ir::ClassDef, ScriptError> {
        if class.super_class.is_some() {
            return Err(self.unsupported("class inheritance", class));
        }
        let mut def = ir::ClassDef {
            name: class.id.as_ref().map(|id| name(id.name.as_str())),
            constructor: None,
            methods: Vec::new(),
            static_methods: Vec::new(),
            fields: Vec::new(),
        };
        for element in &class.body.body {
            match element {
                ClassElement::MethodDefinition(method) => {
                    let func = Rc::new(self.function(&method.value)?);
                    match method.kind {
                        MethodDefinitionKind::Constructor => def.constructor = Some(func),
                        MethodDefinitionKind::Method => {
                            let ir::PropertyKey::Static(key) =
                                self.property_key(&method.key, method.computed)?
                            else {
                                return Err(self.unsupported("computed method name", element));
                            };
                            if method.r#static {
                                def.static_methods.push((key, func));
                            } else {
                                def.methods.push((key, func));
                            }
                        }
                        _ => return Err(self.unsupported("accessor", element)),
                    }
                }
                ClassElement::PropertyDefinition(prop) => {
                    if prop.r#static {
                        return Err(self.unsupported("static field", element));
                    }
                    let ir::PropertyKey::Static(key) = self.property_key(&prop.key, prop.computed)?
                    else {
                        return Err(self.unsupported("computed field name", element));
                    };
                    let value = match &prop.value {
                        Some(v) => Some(self.expr(v)?),
                        None => None,
                    };
                    def.fields.push((key, value));
                }
                other => return Err(self.unsupported("class element", other)),
            }
        }
        Ok(def)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // EXPRESSIONS
    // ═══════════════════════════════════════════════════════════════════════════

    fn boxed(&mut self, e: &Expression<'_>) -> Result<Box<ir::Expr>, ScriptError> {
        Ok(Box::new(self.expr(e)?))
    }

    fn expr(&mut self, e: &Expression<'_>) -> Result<ir::Expr, ScriptError> {
        Ok(match e {
            Expression::BooleanLiteral(b) => ir::Expr::Literal(Value::Bool(b.value)),
            Expression::NullLiteral(_) => ir::Expr::Literal(Value::Null),
            Expression::NumericLiteral(n) => ir::Expr::Literal(Value::Number(n.value)),
            Expression::StringLiteral(s) => ir::Expr::Literal(Value::string(s.value.as_str())),
            Expression::TemplateLiteral(t) => self.template(t)?,
            Expression::Identifier(id) => match id.name.as_str() {
                "undefined" => ir::Expr::Literal(Value::Undefined),
                other => ir::Expr::Ident(name(other)),
            },
            Expression::ThisExpression(_) => ir::Expr::This,
            Expression::ArrayExpression(arr) => {
                let mut items = Vec::new();
                for el in &arr.elements {
                    items.push(match el {
                        ArrayExpressionElement::SpreadElement(s) => {
                            ir::ArrayItem::Spread(self.expr(&s.argument)?)
                        }
                        ArrayExpressionElement::Elision(_) => ir::ArrayItem::Hole,
                        other => match other.as_expression() {
                            Some(e) => ir::ArrayItem::Item(self.expr(e)?),
                            None => return Err(self.unsupported("array element", other)),
                        },
                    });
                }
                ir::Expr::Array(items)
            }
            Expression::ObjectExpression(obj) => {
                let mut items = Vec::new();
                for prop in &obj.properties {
                    match prop {
                        ObjectPropertyKind::ObjectProperty(p) => {
                            if p.kind != PropertyKind::Init {
                                return Err(self.unsupported("getter or setter", prop));
                            }
                            items.push(ir::ObjectItem::Property {
                                key: self.property_key(&p.key, p.computed)?,
                                value: self.expr(&p.value)?,
                            });
                        }
                        ObjectPropertyKind::SpreadProperty(s) => {
                            items.push(ir::ObjectItem::Spread(self.expr(&s.argument)?));
                        }
                    }
                }
                ir::Expr::Object(items)
            }
            Expression::FunctionExpression(func) => ir::Expr::Function(Rc::new(self.function(func)?)),
            Expression::ArrowFunctionExpression(func) => ir::Expr::Function(Rc::new(self.arrow(func)?)),
            Expression::ClassExpression(class) => ir::Expr::Class(Rc::new(self.class(class)?)),
            Expression::UnaryExpression(u) => ir::Expr::Unary(u.operator, self.boxed(&u.argument)?),
            Expression::UpdateExpression(u) => ir::Expr::Update {
                op: u.operator,
                prefix: u.prefix,
                target: Box::new(self.simple_target(&u.argument)?),
            },
            Expression::BinaryExpression(b) => {
                ir::Expr::Binary(b.operator, self.boxed(&b.left)?, self.boxed(&b.right)?)
            }
            Expression::LogicalExpression(l) => {
                ir::Expr::Logical(l.operator, self.boxed(&l.left)?, self.boxed(&l.right)?)
            }
            Expression::AssignmentExpression(a) => ir::Expr::Assign {
                op: a.operator,
                target: Box::new(self.assignment_target(&a.left)?),
                value: self.boxed(&a.right)?,
            },
            Expression::ConditionalExpression(c) => ir::Expr::Conditional {
                test: self.boxed(&c.test)?,
                consequent: self.boxed(&c.consequent)?,
                alternate: self.boxed(&c.alternate)?,
            },
            Expression::StaticMemberExpression(m) => self.static_member(m)?,
            Expression::ComputedMemberExpression(m) => self.computed_member(m)?,
            Expression::CallExpression(call) => self.call(call)?,
            Expression::NewExpression(n) => ir::Expr::New {
                callee: self.boxed(&n.callee)?,
                args: self.arguments(&n.arguments)?,
            },
            Expression::ChainExpression(chain) => {
                let inner = match &chain.expression {
                    ChainElement::CallExpression(call) => self.call(call)?,
                    ChainElement::StaticMemberExpression(m) => self.static_member(m)?,
                    ChainElement::ComputedMemberExpression(m) => self.computed_member(m)?,
                    other => return Err(self.unsupported("optional chain", other)),
                };
                ir::Expr::Chain(Box::new(inner))
            }
            Expression::SequenceExpression(seq) => ir::Expr::Sequence(
                seq.expressions
                    .iter()
                    .map(|e| self.expr(e))
                    .collect::<Result<_, _>>()?,
            ),
            Expression::ParenthesizedExpression(p) => self.expr(&p.expression)?,
            Expression::AwaitExpression(a) => ir::Expr::Await(self.boxed(&a.argument)?),
            Expression::ImportExpression(import) => {
                if self.syntax == ModuleSyntax::Forbidden {
                    return Err(self.unsupported("dynamic import in a template expression", e));
                }
                match &import.source {
                    Expression::StringLiteral(s) => {
                        ir::Expr::LoadModule(self.request_module(s.value.as_str()))
                    }
                    other => ir::Expr::DynamicImport(self.boxed(other)?),
                }
            }
            Expression::RegExpLiteral(_) => return Err(self.unsupported("regular expression", e)),
            Expression::TaggedTemplateExpression(_) => {
                return Err(self.unsupported("tagged template", e))
            }
            Expression::YieldExpression(_) => return Err(self.unsupported("yield", e)),
            other => return Err(self.unsupported("expression", other)),
        })
    }

    fn template(&mut self, t: &TemplateLiteral<'_>) -> Result<ir::Expr, ScriptError> {
        let quasis = t
            .quasis
            .iter()
            .map(|q| match &q.value.cooked {
                Some(cooked) => cooked.to_string(),
                None => q.value.raw.to_string(),
            })
            .collect();
        let exprs = t
            .expressions
            .iter()
            .map(|e| self.expr(e))
            .collect::<Result<_, _>>()?;
        Ok(ir::Expr::Template { quasis, exprs })
    }

    fn static_member(&mut self, m: &StaticMemberExpression<'_>) -> Result<ir::Expr, ScriptError> {
        Ok(ir::Expr::Member {
            object: self.boxed(&m.object)?,
            property: Box::new(ir::Property::Static(name(m.property.name.as_str()))),
            optional: m.optional,
        })
    }

    fn computed_member(
        &mut self,
        m: &ComputedMemberExpression<'_>,
    ) -> Result<ir::Expr, ScriptError> {
        Ok(ir::Expr::Member {
            object: self.boxed(&m.object)?,
            property: Box::new(ir::Property::Computed(self.expr(&m.expression)?)),
            optional: m.optional,
        })
    }

    fn call(&mut self, call: &CallExpression<'_>) -> Result<ir::Expr, ScriptError> {
        Ok(ir::Expr::Call {
            callee: self.boxed(&call.callee)?,
            args: self.arguments(&call.arguments)?,
            optional: call.optional,
        })
    }

    fn arguments(&mut self, args: &[Argument<'_>]) -> Result<Vec<ir::ArrayItem>, ScriptError> {
        args.iter()
            .map(|arg| match arg {
                Argument::SpreadElement(s) => Ok(ir::ArrayItem::Spread(self.expr(&s.argument)?)),
                other => match other.as_expression() {
                    Some(e) => Ok(ir::ArrayItem::Item(self.expr(e)?)),
                    None => Err(self.unsupported("argument", other)),
                },
            })
            .collect()
    }
}

fn export_name<'a>(name: &'a ModuleExportName<'_>) -> &'a str {
    match name {
        ModuleExportName::IdentifierName(id) => id.name.as_str(),
        ModuleExportName::IdentifierReference(id) => id.name.as_str(),
        ModuleExportName::StringLiteral(s) => s.value.as_str(),
    }
}

/// Names introduced by a lowered declaration statement.
fn declared_names(stmt: &ir::Stmt, out: &mut Vec<String>) {
    match stmt {
        ir::Stmt::Declare { decls, .. } => {
            let mut names = Vec::new();
            for d in decls {
                d.pattern.bound_names(&mut names);
            }
            out.extend(names.iter().map(|n| n.to_string()));
        }
        ir::Stmt::Function(def) => out.extend(def.name.iter().map(|n| n.to_string())),
        ir::Stmt::Class(def) => out.extend(def.name.iter().map(|n| n.to_string())),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(s: &str) -> String {
        format!("/abs/{}", s.trim_start_matches("./"))
    }

    #[test]
    fn test_lower_expression_literal_and_member() {
        let expr = lower_expression("user.name").unwrap();
        assert!(matches!(expr, ir::Expr::Member { optional: false, .. }));
        assert!(matches!(
            lower_expression("undefined").unwrap(),
            ir::Expr::Literal(Value::Undefined)
        ));
    }

    #[test]
    fn test_lower_expression_syntax_error() {
        let err = lower_expression("a +").unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)));
    }

    #[test]
    fn test_regex_is_unsupported() {
        let err = lower_expression("/a+/.test(x)").unwrap_err();
        match err {
            ScriptError::Unsupported(msg) => assert!(msg.contains("/a+/")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_imports_are_hoisted_and_resolved() {
        let script = lower_script(
            "const a = 1;\nimport data, { b as c } from './data.js';\nimport * as ns from 'pkg';",
            true,
            &identity,
        )
        .unwrap();
        assert_eq!(script.modules, vec!["/abs/data.js", "/abs/pkg"]);
        assert!(matches!(
            script.body[0],
            ir::Stmt::Declare {
                kind: ir::DeclKind::Const,
                ..
            }
        ));
        assert_eq!(script.body.len(), 3);
    }

    #[test]
    fn test_plain_script_rejects_imports() {
        let err = lower_script("import x from './x.js';", false, &identity).unwrap_err();
        assert!(matches!(err, ScriptError::Syntax(_)));
    }

    #[test]
    fn test_exports_record_aliases() {
        let script = lower_script(
            "export const title = 'x';\nconst count = 2;\nexport { count as total };\nexport default 42;\nexport function helper() {}",
            true,
            &identity,
        )
        .unwrap();
        let pairs: Vec<(String, String)> = script
            .aliases
            .iter()
            .map(|a| (a.local.clone(), a.exported.clone()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("title".to_string(), "title".to_string()),
                ("count".to_string(), "total".to_string()),
                (DEFAULT_EXPORT_LOCAL.to_string(), "default".to_string()),
                ("helper".to_string(), "helper".to_string()),
            ]
        );
    }

    #[test]
    fn test_reexports_become_empty_statements() {
        let script = lower_script(
            "export * from './all.js';\nexport { x } from './x.js';\nconst y = 1;",
            true,
            &identity,
        )
        .unwrap();
        assert_eq!(script.reexports.len(), 2);
        assert!(matches!(script.body[0], ir::Stmt::Empty));
        assert!(matches!(script.body[1], ir::Stmt::Empty));
        assert_eq!(script.body.len(), 3);
    }

    #[test]
    fn test_dynamic_import_literal_is_preloaded() {
        let script = lower_script("const m = await import('./m.js');", false, &identity).unwrap();
        assert_eq!(script.modules, vec!["/abs/m.js"]);
    }

    #[test]
    fn test_param_defaults_and_rest() {
        let script =
            lower_script("function f(a, b = 2, ...rest) { return a; }", false, &identity).unwrap();
        let ir::Stmt::Function(def) = &script.body[0] else {
            panic!("expected function");
        };
        assert_eq!(def.params.len(), 2);
        assert!(matches!(def.params[1], ir::Pattern::Default { .. }));
        assert!(matches!(def.rest, Some(ir::Pattern::Ident(_))));
    }
}
