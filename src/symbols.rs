//! Classifies every name in the program ahead of lowering: plain
//! variables, lists, flattened object properties, inlinable functions,
//! and recursive procedures. Three passes, none of which mutate the AST.

use crate::ast::{Expr, Program, Stmt};
use crate::codegen::format_num;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    variables: Vec<String>,
    variable_set: HashSet<String>,
    variable_initials: HashMap<String, f64>,
    lists: Vec<String>,
    list_set: HashSet<String>,
    pub list_initial_values: HashMap<String, Vec<String>>,
    pub object_mappings: HashMap<String, Vec<String>>,
    pub function_definitions: HashMap<String, FunctionDef>,
    pub recursive_functions: HashSet<String>,
}

impl SymbolTable {
    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn lists(&self) -> &[String] {
        &self.lists
    }

    pub fn variable_initial(&self, name: &str) -> f64 {
        self.variable_initials.get(name).copied().unwrap_or(0.0)
    }

    pub fn list_initial(&self, name: &str) -> &[String] {
        self.list_initial_values
            .get(name)
            .map(|items| items.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_list(&self, name: &str) -> bool {
        self.list_set.contains(name)
    }

    pub fn is_object(&self, name: &str) -> bool {
        self.object_mappings.contains_key(name)
    }

    pub fn is_function(&self, name: &str) -> bool {
        self.function_definitions.contains_key(name)
    }

    pub fn is_recursive(&self, name: &str) -> bool {
        self.recursive_functions.contains(name)
    }

    fn add_variable(&mut self, name: &str) {
        if self.list_set.contains(name) || self.object_mappings.contains_key(name) {
            return;
        }
        if self.variable_set.insert(name.to_string()) {
            self.variables.push(name.to_string());
        }
    }

    fn add_variable_with_initial(&mut self, name: &str, initial: f64) {
        self.add_variable(name);
        self.variable_initials.insert(name.to_string(), initial);
    }

    fn add_list(&mut self, name: &str) {
        if self.list_set.insert(name.to_string()) {
            self.lists.push(name.to_string());
        }
    }

    fn register_object_property(&mut self, object: &str, property: &str) {
        let properties = self.object_mappings.entry(object.to_string()).or_default();
        if properties.iter().any(|p| p == property) {
            return;
        }
        properties.push(property.to_string());
        let flat = flattened_name(object, property);
        self.add_variable_with_initial(&flat, 0.0);
    }
}

pub fn flattened_name(object: &str, property: &str) -> String {
    format!("{}_{}", object, property)
}

pub fn analyze(program: &Program) -> SymbolTable {
    let mut table = SymbolTable::default();
    pass_declarations(&program.body, &mut table);
    pass_assignments(&program.body, &mut table);
    pass_recursion_and_cleanup(&mut table);
    table
}

fn pass_declarations(body: &[Stmt], table: &mut SymbolTable) {
    for stmt in body {
        match stmt {
            Stmt::VarDecl { name, init, .. } => match init {
                Some(Expr::Function { params, body, .. }) => {
                    table.function_definitions.insert(
                        name.clone(),
                        FunctionDef {
                            params: params.clone(),
                            body: body.clone(),
                        },
                    );
                    pass_declarations(body, table);
                }
                Some(Expr::Array { elements, .. }) => {
                    table.add_list(name);
                    let items = elements
                        .iter()
                        .map(|e| literal_text(e).unwrap_or_default())
                        .collect();
                    table.list_initial_values.insert(name.clone(), items);
                    for element in elements {
                        scan_expr(element, table);
                    }
                }
                Some(Expr::Object { properties, .. }) => {
                    let mut keys = Vec::new();
                    for property in properties {
                        let initial = match &property.value {
                            Expr::Number { value, .. } => *value,
                            _ => 0.0,
                        };
                        let flat = flattened_name(name, &property.key);
                        table.add_variable_with_initial(&flat, initial);
                        keys.push(property.key.clone());
                        scan_expr(&property.value, table);
                    }
                    table.object_mappings.insert(name.clone(), keys);
                }
                Some(other) => {
                    table.add_variable(name);
                    scan_expr(other, table);
                }
                None => table.add_variable(name),
            },
            Stmt::FunctionDecl {
                name, params, body, ..
            } => {
                table.function_definitions.insert(
                    name.clone(),
                    FunctionDef {
                        params: params.clone(),
                        body: body.clone(),
                    },
                );
                pass_declarations(body, table);
            }
            Stmt::Expr { expr, .. } => scan_expr(expr, table),
            Stmt::If {
                test,
                consequent,
                alternate,
                ..
            } => {
                scan_expr(test, table);
                pass_declarations(consequent, table);
                pass_declarations(alternate, table);
            }
            Stmt::While { test, body, .. } => {
                scan_expr(test, table);
                pass_declarations(body, table);
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                if let Some(stmt) = init {
                    pass_declarations(std::slice::from_ref(stmt), table);
                }
                if let Some(expr) = test {
                    scan_expr(expr, table);
                }
                if let Some(expr) = update {
                    scan_expr(expr, table);
                }
                pass_declarations(body, table);
            }
            Stmt::Block { body, .. } => pass_declarations(body, table),
            Stmt::Return { value, .. } => {
                if let Some(expr) = value {
                    scan_expr(expr, table);
                }
            }
            Stmt::Empty { .. } => {}
        }
    }
}

fn scan_expr(expr: &Expr, table: &mut SymbolTable) {
    match expr {
        Expr::Member {
            object, property, ..
        } => {
            if let Expr::Ident { name, .. } = object.as_ref() {
                if table.is_object(name) {
                    table.register_object_property(name, property);
                }
            }
            scan_expr(object, table);
        }
        Expr::Index { object, index, .. } => {
            scan_expr(object, table);
            scan_expr(index, table);
        }
        Expr::Call { callee, args, .. } => {
            if let Expr::Member {
                object, property, ..
            } = callee.as_ref()
            {
                if is_list_method(property) {
                    if let Expr::Ident { name, .. } = object.as_ref() {
                        table.add_list(name);
                    }
                }
            }
            scan_expr(callee, table);
            for arg in args {
                scan_expr(arg, table);
            }
        }
        Expr::New { callee, args, .. } => {
            scan_expr(callee, table);
            for arg in args {
                scan_expr(arg, table);
            }
        }
        Expr::Function { body, .. } => pass_declarations(body, table),
        Expr::Assign { target, value, .. } => {
            scan_expr(target, table);
            scan_expr(value, table);
        }
        Expr::Binary { left, right, .. } => {
            scan_expr(left, table);
            scan_expr(right, table);
        }
        Expr::Unary { operand, .. } => scan_expr(operand, table),
        Expr::Update { target, .. } => scan_expr(target, table),
        Expr::Await { operand, .. } => scan_expr(operand, table),
        Expr::Array { elements, .. } => {
            for element in elements {
                scan_expr(element, table);
            }
        }
        Expr::Object { properties, .. } => {
            for property in properties {
                scan_expr(&property.value, table);
            }
        }
        Expr::Number { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::Ident { .. } => {}
    }
}

fn pass_assignments(body: &[Stmt], table: &mut SymbolTable) {
    let mut targets = Vec::new();
    walk_stmts(body, &mut |expr| {
        if let Expr::Assign { target, .. } = expr {
            if let Expr::Ident { name, .. } = target.as_ref() {
                targets.push(name.clone());
            }
        }
    });
    for name in targets {
        table.add_variable(&name);
    }
}

fn pass_recursion_and_cleanup(table: &mut SymbolTable) {
    let mut recursive = Vec::new();
    for (name, def) in &table.function_definitions {
        if stmts_call(&def.body, name) {
            recursive.push(name.clone());
        }
    }
    table.recursive_functions.extend(recursive);

    let mut removed: HashSet<String> = table.function_definitions.keys().cloned().collect();
    for def in table.function_definitions.values() {
        removed.extend(def.params.iter().cloned());
    }
    table.variables.retain(|name| !removed.contains(name));
    for name in &removed {
        table.variable_set.remove(name);
    }
}

fn stmts_call(body: &[Stmt], name: &str) -> bool {
    let mut found = false;
    walk_stmts(body, &mut |expr| {
        if let Expr::Call { callee, .. } = expr {
            if matches!(callee.as_ref(), Expr::Ident { name: callee_name, .. } if callee_name == name)
            {
                found = true;
            }
        }
    });
    found
}

fn is_list_method(name: &str) -> bool {
    matches!(
        name,
        "push" | "pop" | "shift" | "unshift" | "splice" | "slice"
    )
}

fn literal_text(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Number { value, .. } => Some(format_num(*value)),
        Expr::Str { value, .. } => Some(value.clone()),
        Expr::Bool { value, .. } => Some(if *value { "true" } else { "false" }.to_string()),
        _ => None,
    }
}

/// Visits every expression node reachable from `body` in pre-order,
/// including expressions nested inside function bodies.
fn walk_stmts(body: &[Stmt], visit: &mut dyn FnMut(&Expr)) {
    for stmt in body {
        match stmt {
            Stmt::VarDecl { init, .. } => {
                if let Some(expr) = init {
                    walk_expr(expr, visit);
                }
            }
            Stmt::Expr { expr, .. } => walk_expr(expr, visit),
            Stmt::If {
                test,
                consequent,
                alternate,
                ..
            } => {
                walk_expr(test, visit);
                walk_stmts(consequent, visit);
                walk_stmts(alternate, visit);
            }
            Stmt::While { test, body, .. } => {
                walk_expr(test, visit);
                walk_stmts(body, visit);
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                if let Some(stmt) = init {
                    walk_stmts(std::slice::from_ref(stmt), visit);
                }
                if let Some(expr) = test {
                    walk_expr(expr, visit);
                }
                if let Some(expr) = update {
                    walk_expr(expr, visit);
                }
                walk_stmts(body, visit);
            }
            Stmt::Block { body, .. } => walk_stmts(body, visit),
            Stmt::FunctionDecl { body, .. } => walk_stmts(body, visit),
            Stmt::Return { value, .. } => {
                if let Some(expr) = value {
                    walk_expr(expr, visit);
                }
            }
            Stmt::Empty { .. } => {}
        }
    }
}

fn walk_expr(expr: &Expr, visit: &mut dyn FnMut(&Expr)) {
    visit(expr);
    match expr {
        Expr::Array { elements, .. } => {
            for element in elements {
                walk_expr(element, visit);
            }
        }
        Expr::Object { properties, .. } => {
            for property in properties {
                walk_expr(&property.value, visit);
            }
        }
        Expr::Function { body, .. } => walk_stmts(body, visit),
        Expr::Unary { operand, .. } => walk_expr(operand, visit),
        Expr::Update { target, .. } => walk_expr(target, visit),
        Expr::Binary { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::Assign { target, value, .. } => {
            walk_expr(target, visit);
            walk_expr(value, visit);
        }
        Expr::Call { callee, args, .. } | Expr::New { callee, args, .. } => {
            walk_expr(callee, visit);
            for arg in args {
                walk_expr(arg, visit);
            }
        }
        Expr::Member { object, .. } => walk_expr(object, visit),
        Expr::Index { object, index, .. } => {
            walk_expr(object, visit);
            walk_expr(index, visit);
        }
        Expr::Await { operand, .. } => walk_expr(operand, visit),
        Expr::Number { .. }
        | Expr::Str { .. }
        | Expr::Bool { .. }
        | Expr::Null { .. }
        | Expr::Ident { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use crate::parser::Parser;

    fn analyze_source(source: &str) -> SymbolTable {
        let tokens = Lexer::new(source).tokenize().expect("lexing failed");
        let program = Parser::new(tokens).parse_program().expect("parsing failed");
        analyze(&program)
    }

    #[test]
    fn plain_declarations_become_variables() {
        let table = analyze_source("let x = 10; let y; z = 3;");
        assert_eq!(table.variables(), &["x", "y", "z"]);
    }

    #[test]
    fn function_bindings_never_reach_variables() {
        let table = analyze_source("const add = (a, b) => a + b; function f(n) { return n; }");
        assert!(table.variables().is_empty());
        assert!(table.is_function("add"));
        assert!(table.is_function("f"));
        assert!(!table.is_recursive("add"));
    }

    #[test]
    fn array_literal_declares_a_list_with_initial_values() {
        let table = analyze_source("let arr = [1, 'two', true, other];");
        assert_eq!(table.lists(), &["arr"]);
        assert_eq!(table.list_initial("arr"), &["1", "two", "true", ""]);
    }

    #[test]
    fn list_method_call_promotes_receiver_to_list() {
        let table = analyze_source("queue.push(1);");
        assert!(table.is_list("queue"));
    }

    #[test]
    fn object_literal_is_flattened_in_source_order() {
        let table = analyze_source("let hero = { hp: 30, mp: 5, name: title };");
        assert!(table.is_object("hero"));
        assert_eq!(
            table.object_mappings.get("hero").map(|v| v.as_slice()),
            Some(&["hp".to_string(), "mp".to_string(), "name".to_string()][..])
        );
        assert_eq!(table.variables(), &["hero_hp", "hero_mp", "hero_name"]);
        assert_eq!(table.variable_initial("hero_hp"), 30.0);
        assert_eq!(table.variable_initial("hero_name"), 0.0);
        assert!(!table.variables().iter().any(|v| v == "hero"));
    }

    #[test]
    fn later_property_usage_extends_the_mapping() {
        let table = analyze_source("let hero = { hp: 1 }; hero.xp = 0;");
        assert_eq!(
            table.object_mappings.get("hero").map(|v| v.as_slice()),
            Some(&["hp".to_string(), "xp".to_string()][..])
        );
        assert!(table.variables().iter().any(|v| v == "hero_xp"));
    }

    #[test]
    fn direct_recursion_is_detected() {
        let table = analyze_source(
            "function fact(n) { if (n <= 1) return 1; return n * fact(n - 1); } let r = fact(5);",
        );
        assert!(table.is_recursive("fact"));
        assert_eq!(table.variables(), &["r"]);
    }

    #[test]
    fn parameters_are_scrubbed_from_variables() {
        let table = analyze_source("function f(n) { n = n + 1; total = n; } let total = 0;");
        assert!(!table.variables().iter().any(|v| v == "n"));
        assert!(table.variables().iter().any(|v| v == "total"));
    }

    #[test]
    fn recursive_functions_are_a_subset_of_definitions() {
        let table = analyze_source("function loop_fn(n) { return loop_fn(n); } const id = x => x;");
        for name in &table.recursive_functions {
            assert!(table.function_definitions.contains_key(name));
        }
    }
}
