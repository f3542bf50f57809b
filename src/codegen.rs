use crate::ast::{Expr, Position, Program, Stmt};
use crate::symbols::{flattened_name, FunctionDef, SymbolTable};
use anyhow::{anyhow, Result};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;
use zip::write::SimpleFileOptions;

const STAGE_BACKDROP_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="480" height="360" viewBox="0 0 480 360"><rect width="480" height="360" fill="#ffffff"/></svg>"##;
const SPRITE_COSTUME_SVG: &str = r##"<svg xmlns="http://www.w3.org/2000/svg" width="64" height="64" viewBox="0 0 64 64"><circle cx="32" cy="32" r="30" fill="#ffab19"/></svg>"##;
const PROJECT_AGENT: &str = "js2sb3 compiler";

// Mutual recursion is not promoted to procedures, so inlining one
// function can demand inlining another indefinitely; cap the expansion
// and fall back to the safe shadow beyond it.
const MAX_INLINE_DEPTH: usize = 32;

pub fn write_sb3(program: &Program, symbols: &SymbolTable, output_path: &Path) -> Result<()> {
    let bytes = build_sb3_bytes(program, symbols)?;
    if let Some(parent) = output_path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    if let Err(err) = fs::write(output_path, &bytes) {
        let _ = fs::remove_file(output_path);
        return Err(err.into());
    }
    Ok(())
}

pub fn build_sb3_bytes(program: &Program, symbols: &SymbolTable) -> Result<Vec<u8>> {
    let mut builder = ProjectBuilder::new(program, symbols);
    let (project_json, assets) = builder.build()?;
    let mut buffer = Cursor::new(Vec::<u8>::new());
    let mut zip = zip::ZipWriter::new(&mut buffer);
    let opts = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    zip.start_file("project.json", opts)?;
    zip.write_all(&serde_json::to_vec_pretty(&project_json)?)?;

    let mut assets = assets.into_iter().collect::<Vec<_>>();
    assets.sort_by(|(left_name, _), (right_name, _)| left_name.cmp(right_name));
    for (name, bytes) in assets {
        zip.start_file(name, opts)?;
        zip.write_all(&bytes)?;
    }
    zip.finish()?;
    Ok(buffer.into_inner())
}

pub fn build_project_json(program: &Program, symbols: &SymbolTable) -> Result<Value> {
    let mut builder = ProjectBuilder::new(program, symbols);
    let (project_json, _) = builder.build()?;
    Ok(project_json)
}

#[derive(Debug, Clone)]
struct EmittedStatement {
    first: String,
    last: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OperandSlot {
    Arithmetic,
    Comparison,
    ComparisonLeftGt,
}

#[derive(Debug, Clone)]
struct SimpleFor {
    var: String,
    start: Expr,
    end: Expr,
    inclusive: bool,
}

struct ProjectBuilder<'a> {
    program: &'a Program,
    symbols: &'a SymbolTable,
    id_counter: usize,
    assets: HashMap<String, Vec<u8>>,
    result_variables: Vec<String>,
    inline_depth: usize,
}

impl<'a> ProjectBuilder<'a> {
    fn new(program: &'a Program, symbols: &'a SymbolTable) -> Self {
        Self {
            program,
            symbols,
            id_counter: 0,
            assets: HashMap::new(),
            result_variables: Vec::new(),
            inline_depth: 0,
        }
    }

    fn build(&mut self) -> Result<(Value, HashMap<String, Vec<u8>>)> {
        let program = self.program;
        let symbols = self.symbols;
        let mut blocks: Map<String, Value> = Map::new();
        self.emit_program_blocks(&mut blocks, program)?;
        let has_say = blocks
            .values()
            .any(|b| b.get("opcode").and_then(Value::as_str) == Some("looks_say"));

        let mut variables_json: Map<String, Value> = Map::new();
        for name in symbols.variables() {
            variables_json.insert(
                name.clone(),
                json!([name, number_value(symbols.variable_initial(name))]),
            );
        }
        for name in &self.result_variables {
            if !variables_json.contains_key(name) {
                variables_json.insert(name.clone(), json!([name, 0]));
            }
        }
        let mut lists_json: Map<String, Value> = Map::new();
        for name in symbols.lists() {
            lists_json.insert(name.clone(), json!([name, symbols.list_initial(name)]));
        }

        let backdrop = self.register_asset("backdrop1", STAGE_BACKDROP_SVG, 240.0, 180.0);
        let costume = self.register_asset("costume1", SPRITE_COSTUME_SVG, 32.0, 32.0);

        let stage = json!({
            "isStage": true,
            "name": "Stage",
            "variables": {},
            "lists": {},
            "broadcasts": {},
            "blocks": {},
            "comments": {},
            "currentCostume": 0,
            "costumes": [backdrop],
            "sounds": [],
            "volume": 100,
            "layerOrder": 0,
            "tempo": 60,
            "videoTransparency": 50,
            "videoState": "on",
            "textToSpeechLanguage": Value::Null
        });
        let sprite = json!({
            "isStage": false,
            "name": "Sprite1",
            "variables": variables_json,
            "lists": lists_json,
            "broadcasts": {},
            "blocks": blocks,
            "comments": {},
            "currentCostume": 0,
            "costumes": [costume],
            "sounds": [],
            "volume": 100,
            "layerOrder": 1,
            "visible": !has_say,
            "x": 0,
            "y": 0,
            "size": 100,
            "direction": 90,
            "draggable": false,
            "rotationStyle": "all around"
        });
        let project_json = json!({
            "targets": [stage, sprite],
            "monitors": [],
            "extensions": [],
            "meta": {
                "semver": "3.0.0",
                "vm": "0.2.0",
                "agent": PROJECT_AGENT
            }
        });
        Ok((project_json, std::mem::take(&mut self.assets)))
    }

    fn register_asset(&mut self, name: &str, svg: &str, center_x: f64, center_y: f64) -> Value {
        let digest = format!("{:x}", md5::compute(svg.as_bytes()));
        let md5ext = format!("{}.svg", digest);
        self.assets.insert(md5ext.clone(), svg.as_bytes().to_vec());
        json!({
            "name": name,
            "assetId": digest,
            "md5ext": md5ext,
            "dataFormat": "svg",
            "rotationCenterX": center_x,
            "rotationCenterY": center_y
        })
    }

    fn new_block_id(&mut self) -> String {
        self.id_counter += 1;
        format!("block_{}", self.id_counter)
    }

    fn emit_program_blocks(
        &mut self,
        blocks: &mut Map<String, Value>,
        program: &Program,
    ) -> Result<()> {
        let root_id = self.new_block_id();
        blocks.insert(
            root_id.clone(),
            json!({
                "opcode": "event_whenflagclicked",
                "next": Value::Null,
                "parent": Value::Null,
                "inputs": {},
                "fields": {},
                "shadow": false,
                "topLevel": true,
                "x": 0,
                "y": 0
            }),
        );
        let (first, last) = self.emit_statement_chain(blocks, &program.body, &root_id)?;
        if let Some(first) = &first {
            set_block_next(blocks, &root_id, Value::String(first.clone()))?;
        }
        let tail = last.unwrap_or_else(|| root_id.clone());
        let stop_id = self.new_block_id();
        blocks.insert(
            stop_id.clone(),
            json!({
                "opcode": "control_stop",
                "next": Value::Null,
                "parent": tail,
                "inputs": {},
                "fields": { "STOP_OPTION": ["all", Value::Null] },
                "shadow": false,
                "topLevel": false,
                "mutation": { "tagName": "mutation", "children": [], "hasnext": "false" }
            }),
        );
        set_block_next(blocks, &tail, Value::String(stop_id))?;
        Ok(())
    }

    fn emit_statement_chain(
        &mut self,
        blocks: &mut Map<String, Value>,
        statements: &[Stmt],
        parent_id: &str,
    ) -> Result<(Option<String>, Option<String>)> {
        let mut first: Option<String> = None;
        let mut prev_last: Option<String> = None;
        for stmt in statements {
            let stmt_parent = prev_last.clone().unwrap_or_else(|| parent_id.to_string());
            let Some(emitted) = self.emit_statement(blocks, stmt, &stmt_parent)? else {
                continue;
            };
            if let Some(prev_id) = &prev_last {
                set_block_next(blocks, prev_id, Value::String(emitted.first.clone()))?;
            }
            if first.is_none() {
                first = Some(emitted.first.clone());
            }
            prev_last = Some(emitted.last);
        }
        Ok((first, prev_last))
    }

    /// Statements outside the translation tables contribute no block and
    /// no error; the feature gate already decided what is allowed.
    fn emit_statement(
        &mut self,
        blocks: &mut Map<String, Value>,
        stmt: &Stmt,
        parent_id: &str,
    ) -> Result<Option<EmittedStatement>> {
        match stmt {
            Stmt::VarDecl { name, init, .. } => {
                if self.symbols.is_function(name) {
                    if self.symbols.is_recursive(name) {
                        self.emit_procedure_definition(blocks, name, parent_id)?;
                    }
                    return Ok(None);
                }
                match init {
                    Some(Expr::Array { .. }) | Some(Expr::Object { .. }) => Ok(None),
                    _ => {
                        let id =
                            self.emit_set_variable(blocks, parent_id, name, init.as_ref())?;
                        Ok(Some(single(id)))
                    }
                }
            }
            Stmt::Expr { expr, .. } => self.emit_expr_statement(blocks, expr, parent_id),
            Stmt::If {
                test, consequent, ..
            } => {
                let block_id = self.new_block_id();
                let condition = self.expr_input(blocks, test, &block_id)?;
                blocks.insert(
                    block_id.clone(),
                    json!({
                        "opcode": "control_if",
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": { "CONDITION": condition },
                        "fields": {},
                        "shadow": false,
                        "topLevel": false
                    }),
                );
                let (sub_first, _) = self.emit_statement_chain(blocks, consequent, &block_id)?;
                if let Some(sub_first) = sub_first {
                    set_block_input(blocks, &block_id, "SUBSTACK", json!([2, sub_first]))?;
                }
                Ok(Some(single(block_id)))
            }
            Stmt::While { test, body, .. } => {
                let block_id = self.new_block_id();
                let negated = negate_condition(test);
                let condition = self.expr_input(blocks, &negated, &block_id)?;
                blocks.insert(
                    block_id.clone(),
                    json!({
                        "opcode": "control_repeat_until",
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": { "CONDITION": condition },
                        "fields": {},
                        "shadow": false,
                        "topLevel": false
                    }),
                );
                let (sub_first, _) = self.emit_statement_chain(blocks, body, &block_id)?;
                if let Some(sub_first) = sub_first {
                    set_block_input(blocks, &block_id, "SUBSTACK", json!([2, sub_first]))?;
                }
                Ok(Some(single(block_id)))
            }
            Stmt::For {
                init,
                test,
                update,
                body,
                ..
            } => {
                if let Some(simple) = match_simple_for(init, test, update) {
                    return self.emit_simple_for(blocks, parent_id, &simple, body);
                }
                self.emit_general_for(blocks, parent_id, init, test, update, body)
            }
            Stmt::Block { body, .. } => {
                let (first, last) = self.emit_statement_chain(blocks, body, parent_id)?;
                match (first, last) {
                    (Some(first), Some(last)) => Ok(Some(EmittedStatement { first, last })),
                    _ => Ok(None),
                }
            }
            Stmt::FunctionDecl { name, .. } => {
                if self.symbols.is_recursive(name) {
                    self.emit_procedure_definition(blocks, name, parent_id)?;
                }
                Ok(None)
            }
            Stmt::Return { .. } | Stmt::Empty { .. } => Ok(None),
        }
    }

    fn emit_expr_statement(
        &mut self,
        blocks: &mut Map<String, Value>,
        expr: &Expr,
        parent_id: &str,
    ) -> Result<Option<EmittedStatement>> {
        match expr {
            Expr::Assign {
                op, target, value, ..
            } => {
                let effective = effective_assign_value(op, target, value);
                match target.as_ref() {
                    Expr::Ident { name, .. } => {
                        let id =
                            self.emit_set_variable(blocks, parent_id, name, Some(&effective))?;
                        Ok(Some(single(id)))
                    }
                    Expr::Index { object, index, .. } => {
                        if let Expr::Ident { name, .. } = object.as_ref() {
                            if self.symbols.is_list(name) {
                                let id = self.emit_replace_item_of_list(
                                    blocks, parent_id, name, index, &effective,
                                )?;
                                return Ok(Some(single(id)));
                            }
                        }
                        Ok(None)
                    }
                    Expr::Member {
                        object, property, ..
                    } => {
                        if let Expr::Ident { name, .. } = object.as_ref() {
                            if self.symbols.is_object(name) {
                                let flat = flattened_name(name, property);
                                let id = self.emit_set_variable(
                                    blocks,
                                    parent_id,
                                    &flat,
                                    Some(&effective),
                                )?;
                                return Ok(Some(single(id)));
                            }
                        }
                        Ok(None)
                    }
                    _ => Ok(None),
                }
            }
            Expr::Update { op, target, .. } => {
                let Expr::Ident { name, pos } = target.as_ref() else {
                    return Ok(None);
                };
                let step = Expr::Binary {
                    pos: *pos,
                    op: if op == "++" { "+" } else { "-" }.to_string(),
                    left: target.clone(),
                    right: Box::new(Expr::Number {
                        pos: *pos,
                        value: 1.0,
                    }),
                };
                let id = self.emit_set_variable(blocks, parent_id, name, Some(&step))?;
                Ok(Some(single(id)))
            }
            Expr::Call { callee, args, .. } => match callee.as_ref() {
                Expr::Ident { name, .. } if name == "scratch_say" => {
                    let id = self.emit_say(blocks, parent_id, args.first())?;
                    Ok(Some(single(id)))
                }
                Expr::Member {
                    object, property, ..
                } => {
                    if let Expr::Ident { name, .. } = object.as_ref() {
                        if self.symbols.is_list(name) {
                            if property == "push" {
                                let id = self.emit_add_to_list(
                                    blocks,
                                    parent_id,
                                    name,
                                    args.first(),
                                )?;
                                return Ok(Some(single(id)));
                            }
                            if property == "pop" {
                                let id = self.emit_delete_last_of_list(blocks, parent_id, name)?;
                                return Ok(Some(single(id)));
                            }
                        }
                    }
                    Ok(None)
                }
                _ => Ok(None),
            },
            _ => Ok(None),
        }
    }

    fn emit_simple_for(
        &mut self,
        blocks: &mut Map<String, Value>,
        parent_id: &str,
        simple: &SimpleFor,
        body: &[Stmt],
    ) -> Result<Option<EmittedStatement>> {
        let init_id = self.emit_set_variable(blocks, parent_id, &simple.var, Some(&simple.start))?;
        let repeat_id = self.new_block_id();
        let times = self.repeat_times_input(blocks, simple, &repeat_id)?;
        blocks.insert(
            repeat_id.clone(),
            json!({
                "opcode": "control_repeat",
                "next": Value::Null,
                "parent": init_id,
                "inputs": { "TIMES": times },
                "fields": {},
                "shadow": false,
                "topLevel": false
            }),
        );
        set_block_next(blocks, &init_id, Value::String(repeat_id.clone()))?;

        let mut loop_body = body.to_vec();
        loop_body.push(increment_stmt(&simple.var));
        let (sub_first, _) = self.emit_statement_chain(blocks, &loop_body, &repeat_id)?;
        if let Some(sub_first) = sub_first {
            set_block_input(blocks, &repeat_id, "SUBSTACK", json!([2, sub_first]))?;
        }
        Ok(Some(EmittedStatement {
            first: init_id,
            last: repeat_id,
        }))
    }

    /// `TIMES` is the unclamped span; a backwards range yields a negative
    /// repeat count and the target environment skips the loop.
    fn repeat_times_input(
        &mut self,
        blocks: &mut Map<String, Value>,
        simple: &SimpleFor,
        repeat_id: &str,
    ) -> Result<Value> {
        if let (Expr::Number { value: start, .. }, Expr::Number { value: end, .. }) =
            (&simple.start, &simple.end)
        {
            let span = end - start + if simple.inclusive { 1.0 } else { 0.0 };
            return Ok(json!([1, [4, format_num(span)]]));
        }
        let pos = simple.start.pos();
        let span = Expr::Binary {
            pos,
            op: "-".to_string(),
            left: Box::new(simple.end.clone()),
            right: Box::new(simple.start.clone()),
        };
        let times_expr = if simple.inclusive {
            Expr::Binary {
                pos,
                op: "+".to_string(),
                left: Box::new(span),
                right: Box::new(Expr::Number { pos, value: 1.0 }),
            }
        } else {
            span
        };
        self.expr_input(blocks, &times_expr, repeat_id)
    }

    fn emit_general_for(
        &mut self,
        blocks: &mut Map<String, Value>,
        parent_id: &str,
        init: &Option<Box<Stmt>>,
        test: &Option<Expr>,
        update: &Option<Expr>,
        body: &[Stmt],
    ) -> Result<Option<EmittedStatement>> {
        let init_emitted = match init {
            Some(stmt) => self.emit_statement(blocks, stmt, parent_id)?,
            None => None,
        };
        let repeat_parent = init_emitted
            .as_ref()
            .map(|e| e.last.clone())
            .unwrap_or_else(|| parent_id.to_string());
        let repeat_id = self.new_block_id();
        let condition = match test {
            Some(test) => {
                let negated = negate_condition(test);
                self.expr_input(blocks, &negated, &repeat_id)?
            }
            None => json!([1, [10, "true"]]),
        };
        blocks.insert(
            repeat_id.clone(),
            json!({
                "opcode": "control_repeat_until",
                "next": Value::Null,
                "parent": repeat_parent,
                "inputs": { "CONDITION": condition },
                "fields": {},
                "shadow": false,
                "topLevel": false
            }),
        );
        if let Some(prev) = &init_emitted {
            set_block_next(blocks, &prev.last, Value::String(repeat_id.clone()))?;
        }

        let mut loop_body = body.to_vec();
        if let Some(update_expr) = update {
            loop_body.push(Stmt::Expr {
                pos: update_expr.pos(),
                expr: update_expr.clone(),
            });
        }
        let (sub_first, _) = self.emit_statement_chain(blocks, &loop_body, &repeat_id)?;
        if let Some(sub_first) = sub_first {
            set_block_input(blocks, &repeat_id, "SUBSTACK", json!([2, sub_first]))?;
        }
        let first = init_emitted
            .map(|e| e.first)
            .unwrap_or_else(|| repeat_id.clone());
        Ok(Some(EmittedStatement {
            first,
            last: repeat_id,
        }))
    }

    /// The definition hangs off the current chain position without a
    /// `next` link; the flag-click root stays the only top-level block.
    fn emit_procedure_definition(
        &mut self,
        blocks: &mut Map<String, Value>,
        name: &str,
        parent_id: &str,
    ) -> Result<()> {
        let symbols = self.symbols;
        let Some(def) = symbols.function_definitions.get(name) else {
            return Err(anyhow!("Missing function definition for '{}'.", name));
        };
        let definition_id = self.new_block_id();
        blocks.insert(
            definition_id.clone(),
            json!({
                "opcode": "procedures_definition",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": {},
                "fields": {},
                "shadow": false,
                "topLevel": false,
                "mutation": {
                    "tagName": "mutation",
                    "children": [],
                    "proccode": name,
                    "argumentids": serde_json::to_string(&def.params)?,
                    "warp": "false"
                }
            }),
        );
        let (first, _) = self.emit_statement_chain(blocks, &def.body, &definition_id)?;
        if let Some(first) = first {
            set_block_next(blocks, &definition_id, Value::String(first))?;
        }
        Ok(())
    }

    fn emit_set_variable(
        &mut self,
        blocks: &mut Map<String, Value>,
        parent_id: &str,
        name: &str,
        value: Option<&Expr>,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        let value_input = match value {
            Some(expr) => self.expr_input(blocks, expr, &block_id)?,
            None => json!([1, [4, "0"]]),
        };
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": "data_setvariableto",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": { "VALUE": value_input },
                "fields": { "VARIABLE": [name, name] },
                "shadow": false,
                "topLevel": false
            }),
        );
        Ok(block_id)
    }

    fn emit_say(
        &mut self,
        blocks: &mut Map<String, Value>,
        parent_id: &str,
        message: Option<&Expr>,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        let message_input = match message {
            Some(expr) => self.expr_input(blocks, expr, &block_id)?,
            None => json!([1, [10, ""]]),
        };
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": "looks_say",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": { "MESSAGE": message_input },
                "fields": {},
                "shadow": false,
                "topLevel": false
            }),
        );
        Ok(block_id)
    }

    fn emit_add_to_list(
        &mut self,
        blocks: &mut Map<String, Value>,
        parent_id: &str,
        list_name: &str,
        item: Option<&Expr>,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        let item_input = match item {
            Some(expr) => self.expr_input(blocks, expr, &block_id)?,
            None => json!([1, [10, ""]]),
        };
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": "data_addtolist",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": { "ITEM": item_input },
                "fields": { "LIST": [list_name, list_name] },
                "shadow": false,
                "topLevel": false
            }),
        );
        Ok(block_id)
    }

    fn emit_delete_last_of_list(
        &mut self,
        blocks: &mut Map<String, Value>,
        parent_id: &str,
        list_name: &str,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        let length_id = self.emit_list_length(blocks, list_name, &block_id)?;
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": "data_deleteoflist",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": { "INDEX": [2, length_id] },
                "fields": { "LIST": [list_name, list_name] },
                "shadow": false,
                "topLevel": false
            }),
        );
        Ok(block_id)
    }

    /// Index expressions pass through untouched; the target environment
    /// is 1-based and source programs using 0-based indices observe the
    /// off-by-one the original translator had.
    fn emit_replace_item_of_list(
        &mut self,
        blocks: &mut Map<String, Value>,
        parent_id: &str,
        list_name: &str,
        index: &Expr,
        item: &Expr,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        let index_input = self.expr_input(blocks, index, &block_id)?;
        let item_input = self.expr_input(blocks, item, &block_id)?;
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": "data_replaceitemoflist",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": { "INDEX": index_input, "ITEM": item_input },
                "fields": { "LIST": [list_name, list_name] },
                "shadow": false,
                "topLevel": false
            }),
        );
        Ok(block_id)
    }

    fn emit_list_length(
        &mut self,
        blocks: &mut Map<String, Value>,
        list_name: &str,
        parent_id: &str,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": "data_lengthoflist",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": {},
                "fields": { "LIST": [list_name, list_name] },
                "shadow": false,
                "topLevel": false
            }),
        );
        Ok(block_id)
    }

    fn emit_item_of_list(
        &mut self,
        blocks: &mut Map<String, Value>,
        list_name: &str,
        index: &Expr,
        parent_id: &str,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        let index_input = self.expr_input(blocks, index, &block_id)?;
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": "data_itemoflist",
                "next": Value::Null,
                "parent": parent_id,
                "inputs": { "INDEX": index_input },
                "fields": { "LIST": [list_name, list_name] },
                "shadow": false,
                "topLevel": false
            }),
        );
        Ok(block_id)
    }

    /// Default encoding for an expression plugged into an input slot.
    fn expr_input(
        &mut self,
        blocks: &mut Map<String, Value>,
        expr: &Expr,
        parent_id: &str,
    ) -> Result<Value> {
        let symbols = self.symbols;
        match expr {
            Expr::Number { value, .. } => Ok(json!([1, [4, format_num(*value)]])),
            Expr::Str { value, .. } => Ok(json!([1, [10, value]])),
            Expr::Bool { value, .. } => {
                Ok(json!([1, [10, if *value { "true" } else { "false" }]]))
            }
            Expr::Null { .. } => Ok(json!([1, [10, ""]])),
            Expr::Ident { name, .. } => Ok(json!([3, [12, name, name], [10, ""]])),
            Expr::Member {
                object, property, ..
            } => {
                if let Expr::Ident { name, .. } = object.as_ref() {
                    if property == "length" && symbols.is_list(name) {
                        let id = self.emit_list_length(blocks, name, parent_id)?;
                        return Ok(json!([2, id]));
                    }
                    if symbols.is_object(name) {
                        let flat = flattened_name(name, property);
                        return Ok(json!([3, [12, flat, flat], [10, ""]]));
                    }
                }
                Ok(json!([1, [10, "0"]]))
            }
            Expr::Index { object, index, .. } => {
                if let Expr::Ident { name, .. } = object.as_ref() {
                    if symbols.is_list(name) {
                        let id = self.emit_item_of_list(blocks, name, index, parent_id)?;
                        return Ok(json!([2, id]));
                    }
                }
                Ok(json!([1, [10, "0"]]))
            }
            Expr::Call { callee, args, .. } => {
                if let Expr::Ident { name, .. } = callee.as_ref() {
                    return self.encode_call(blocks, name, args, parent_id, None);
                }
                Ok(json!([1, [10, "0"]]))
            }
            Expr::Unary { op, operand, .. } if op == "!" => {
                let not_id = self.new_block_id();
                let operand_input = self.expr_input(blocks, operand, &not_id)?;
                blocks.insert(
                    not_id.clone(),
                    json!({
                        "opcode": "operator_not",
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": { "OPERAND": operand_input },
                        "fields": {},
                        "shadow": false,
                        "topLevel": false
                    }),
                );
                Ok(json!([2, not_id]))
            }
            Expr::Binary {
                op, left, right, ..
            } => self.emit_binary_expr(blocks, op, left, right, parent_id),
            _ => Ok(json!([1, [10, "0"]])),
        }
    }

    fn encode_call(
        &mut self,
        blocks: &mut Map<String, Value>,
        name: &str,
        args: &[Expr],
        parent_id: &str,
        slot: Option<OperandSlot>,
    ) -> Result<Value> {
        let symbols = self.symbols;
        let Some(def) = symbols.function_definitions.get(name) else {
            return Ok(json!([1, [10, "0"]]));
        };
        if symbols.recursive_functions.contains(name) {
            let call_id = self.new_block_id();
            let mut inputs = Map::new();
            for (index, param) in def.params.iter().enumerate() {
                let input = match args.get(index) {
                    Some(arg) => self.expr_input(blocks, arg, &call_id)?,
                    None => json!([1, [4, "0"]]),
                };
                inputs.insert(param.clone(), input);
            }
            blocks.insert(
                call_id.clone(),
                json!({
                    "opcode": "procedures_call",
                    "next": Value::Null,
                    "parent": parent_id,
                    "inputs": inputs,
                    "fields": {},
                    "shadow": false,
                    "topLevel": false,
                    "mutation": {
                        "tagName": "mutation",
                        "children": [],
                        "proccode": name,
                        "argumentids": serde_json::to_string(&def.params)?,
                        "warp": "false"
                    }
                }),
            );
            let result_var = format!("{}_result", name);
            if !self.result_variables.contains(&result_var) {
                self.result_variables.push(result_var);
            }
            return Ok(json!([2, call_id]));
        }

        if self.inline_depth >= MAX_INLINE_DEPTH {
            return Ok(json!([1, [10, "0"]]));
        }
        let inlined = inline_function(def, args);
        self.inline_depth += 1;
        let out = match slot {
            Some(slot) => self.operand_input(blocks, &inlined, parent_id, slot),
            None => self.expr_input(blocks, &inlined, parent_id),
        };
        self.inline_depth -= 1;
        out
    }

    fn emit_binary_expr(
        &mut self,
        blocks: &mut Map<String, Value>,
        op: &str,
        left: &Expr,
        right: &Expr,
        parent_id: &str,
    ) -> Result<Value> {
        match op {
            "+" | "-" | "*" | "/" => {
                let opcode = match op {
                    "+" => "operator_add",
                    "-" => "operator_subtract",
                    "*" => "operator_multiply",
                    _ => "operator_divide",
                };
                let block_id = self.new_block_id();
                blocks.insert(
                    block_id.clone(),
                    json!({
                        "opcode": opcode,
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": {},
                        "fields": {},
                        "shadow": false,
                        "topLevel": false
                    }),
                );
                let left_input =
                    self.operand_input(blocks, left, &block_id, OperandSlot::Arithmetic)?;
                let right_input =
                    self.operand_input(blocks, right, &block_id, OperandSlot::Arithmetic)?;
                set_block_input(blocks, &block_id, "NUM1", left_input)?;
                set_block_input(blocks, &block_id, "NUM2", right_input)?;
                Ok(json!([2, block_id]))
            }
            "<" | ">" | "==" | "===" => {
                let opcode = match op {
                    "<" => "operator_lt",
                    ">" => "operator_gt",
                    _ => "operator_equals",
                };
                let id = self.emit_comparison(blocks, opcode, left, right, parent_id)?;
                Ok(json!([2, id]))
            }
            "<=" | ">=" | "!=" | "!==" => {
                let inner_opcode = match op {
                    "<=" => "operator_gt",
                    ">=" => "operator_lt",
                    _ => "operator_equals",
                };
                let not_id = self.new_block_id();
                let inner_id = self.emit_comparison(blocks, inner_opcode, left, right, &not_id)?;
                blocks.insert(
                    not_id.clone(),
                    json!({
                        "opcode": "operator_not",
                        "next": Value::Null,
                        "parent": parent_id,
                        "inputs": { "OPERAND": [2, inner_id] },
                        "fields": {},
                        "shadow": false,
                        "topLevel": false
                    }),
                );
                Ok(json!([2, not_id]))
            }
            _ => Ok(json!([1, [10, "0"]])),
        }
    }

    fn emit_comparison(
        &mut self,
        blocks: &mut Map<String, Value>,
        opcode: &str,
        left: &Expr,
        right: &Expr,
        parent_id: &str,
    ) -> Result<String> {
        let block_id = self.new_block_id();
        blocks.insert(
            block_id.clone(),
            json!({
                "opcode": opcode,
                "next": Value::Null,
                "parent": parent_id,
                "inputs": {},
                "fields": {},
                "shadow": false,
                "topLevel": false
            }),
        );
        let left_slot = if opcode == "operator_gt" {
            OperandSlot::ComparisonLeftGt
        } else {
            OperandSlot::Comparison
        };
        let left_input = self.operand_input(blocks, left, &block_id, left_slot)?;
        let right_input = self.operand_input(blocks, right, &block_id, OperandSlot::Comparison)?;
        set_block_input(blocks, &block_id, "OPERAND1", left_input)?;
        set_block_input(blocks, &block_id, "OPERAND2", right_input)?;
        Ok(block_id)
    }

    /// Slot-specific operand encodings. The gt-left asymmetry and the
    /// string shadows on comparison literals match what the target
    /// environment's validator accepts.
    fn operand_input(
        &mut self,
        blocks: &mut Map<String, Value>,
        expr: &Expr,
        parent_id: &str,
        slot: OperandSlot,
    ) -> Result<Value> {
        let symbols = self.symbols;
        match expr {
            Expr::Number { value, .. } => Ok(match slot {
                OperandSlot::Arithmetic => json!([1, [4, format_num(*value)]]),
                _ => json!([1, [10, format_num(*value)]]),
            }),
            Expr::Str { value, .. } => Ok(json!([1, [10, value]])),
            Expr::Bool { value, .. } => {
                Ok(json!([1, [10, if *value { "true" } else { "false" }]]))
            }
            Expr::Null { .. } => Ok(json!([1, [10, ""]])),
            Expr::Ident { name, .. } => Ok(ident_operand(name, slot)),
            Expr::Member {
                object, property, ..
            } => {
                if let Expr::Ident { name, .. } = object.as_ref() {
                    if symbols.is_object(name) {
                        let flat = flattened_name(name, property);
                        return Ok(ident_operand(&flat, slot));
                    }
                }
                self.expr_input(blocks, expr, parent_id)
            }
            Expr::Call { callee, args, .. } => {
                if let Expr::Ident { name, .. } = callee.as_ref() {
                    return self.encode_call(blocks, name, args, parent_id, Some(slot));
                }
                Ok(json!([1, [10, "0"]]))
            }
            _ => self.expr_input(blocks, expr, parent_id),
        }
    }
}

fn single(id: String) -> EmittedStatement {
    EmittedStatement {
        first: id.clone(),
        last: id,
    }
}

fn ident_operand(name: &str, slot: OperandSlot) -> Value {
    match slot {
        OperandSlot::Arithmetic => json!([3, [12, name, name], [4, ""]]),
        OperandSlot::ComparisonLeftGt => json!([3, [12, name, name], [10, ""]]),
        OperandSlot::Comparison => json!([2, [12, name, name]]),
    }
}

/// Loop conditions are negated by swapping each comparison with its
/// mirror; everything else is wrapped in `!`.
fn negate_condition(expr: &Expr) -> Expr {
    if let Expr::Binary {
        pos,
        op,
        left,
        right,
    } = expr
    {
        if let Some(mirrored) = mirror_comparison(op) {
            return Expr::Binary {
                pos: *pos,
                op: mirrored.to_string(),
                left: left.clone(),
                right: right.clone(),
            };
        }
    }
    Expr::Unary {
        pos: expr.pos(),
        op: "!".to_string(),
        operand: Box::new(expr.clone()),
    }
}

fn mirror_comparison(op: &str) -> Option<&'static str> {
    match op {
        "<" => Some(">"),
        ">" => Some("<"),
        "<=" => Some(">="),
        ">=" => Some("<="),
        "==" | "===" => Some("!="),
        "!=" | "!==" => Some("=="),
        _ => None,
    }
}

fn effective_assign_value(op: &str, target: &Expr, value: &Expr) -> Expr {
    if op == "=" {
        return value.clone();
    }
    Expr::Binary {
        pos: target.pos(),
        op: op.trim_end_matches('=').to_string(),
        left: Box::new(target.clone()),
        right: Box::new(value.clone()),
    }
}

fn increment_stmt(var: &str) -> Stmt {
    let pos = Position::new(0, 0);
    Stmt::Expr {
        pos,
        expr: Expr::Assign {
            pos,
            op: "=".to_string(),
            target: Box::new(Expr::Ident {
                pos,
                name: var.to_string(),
            }),
            value: Box::new(Expr::Binary {
                pos,
                op: "+".to_string(),
                left: Box::new(Expr::Ident {
                    pos,
                    name: var.to_string(),
                }),
                right: Box::new(Expr::Number { pos, value: 1.0 }),
            }),
        },
    }
}

fn match_simple_for(
    init: &Option<Box<Stmt>>,
    test: &Option<Expr>,
    update: &Option<Expr>,
) -> Option<SimpleFor> {
    let init_stmt = init.as_deref()?;
    let Stmt::VarDecl {
        name,
        init: Some(start),
        ..
    } = init_stmt
    else {
        return None;
    };
    let Some(Expr::Binary {
        op, left, right, ..
    }) = test
    else {
        return None;
    };
    if op != "<" && op != "<=" {
        return None;
    }
    let Expr::Ident {
        name: test_name, ..
    } = left.as_ref()
    else {
        return None;
    };
    if test_name != name {
        return None;
    }
    if !is_increment_of(update.as_ref()?, name) {
        return None;
    }
    Some(SimpleFor {
        var: name.clone(),
        start: start.clone(),
        end: right.as_ref().clone(),
        inclusive: op == "<=",
    })
}

fn is_increment_of(update: &Expr, var: &str) -> bool {
    match update {
        Expr::Update { op, target, .. } => {
            op == "++" && matches!(target.as_ref(), Expr::Ident { name, .. } if name == var)
        }
        Expr::Assign {
            op, target, value, ..
        } => {
            op == "+="
                && matches!(target.as_ref(), Expr::Ident { name, .. } if name == var)
                && matches!(value.as_ref(), Expr::Number { value, .. } if *value == 1.0)
        }
        _ => false,
    }
}

/// β-reduction of a non-recursive call: substitute the arguments into
/// the first top-level return expression. Missing arguments become the
/// numeric literal 0, and so does a body without a `return`.
fn inline_function(def: &FunctionDef, args: &[Expr]) -> Expr {
    let pos = Position::new(0, 0);
    let mut map: HashMap<String, Expr> = HashMap::new();
    for (index, param) in def.params.iter().enumerate() {
        let arg = args
            .get(index)
            .cloned()
            .unwrap_or(Expr::Number { pos, value: 0.0 });
        map.insert(param.clone(), arg);
    }
    let returned = def.body.iter().find_map(|stmt| match stmt {
        Stmt::Return { value, .. } => Some(value.clone()),
        _ => None,
    });
    match returned {
        Some(Some(expr)) => substitute_expr(&expr, &map),
        _ => Expr::Number { pos, value: 0.0 },
    }
}

fn substitute_expr(expr: &Expr, map: &HashMap<String, Expr>) -> Expr {
    match expr {
        Expr::Ident { name, .. } => map.get(name).cloned().unwrap_or_else(|| expr.clone()),
        Expr::Function {
            pos,
            params,
            body,
            is_async,
        } => {
            // Parameters of a nested function shadow the substitution.
            let filtered: HashMap<String, Expr> = map
                .iter()
                .filter(|(key, _)| !params.contains(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Expr::Function {
                pos: *pos,
                params: params.clone(),
                body: body
                    .iter()
                    .map(|stmt| substitute_stmt(stmt, &filtered))
                    .collect(),
                is_async: *is_async,
            }
        }
        Expr::Array { pos, elements } => Expr::Array {
            pos: *pos,
            elements: elements
                .iter()
                .map(|e| substitute_expr(e, map))
                .collect(),
        },
        Expr::Object { pos, properties } => Expr::Object {
            pos: *pos,
            properties: properties
                .iter()
                .map(|p| crate::ast::ObjectProperty {
                    key: p.key.clone(),
                    value: substitute_expr(&p.value, map),
                })
                .collect(),
        },
        Expr::Unary { pos, op, operand } => Expr::Unary {
            pos: *pos,
            op: op.clone(),
            operand: Box::new(substitute_expr(operand, map)),
        },
        Expr::Update {
            pos,
            op,
            prefix,
            target,
        } => Expr::Update {
            pos: *pos,
            op: op.clone(),
            prefix: *prefix,
            target: Box::new(substitute_expr(target, map)),
        },
        Expr::Binary {
            pos,
            op,
            left,
            right,
        } => Expr::Binary {
            pos: *pos,
            op: op.clone(),
            left: Box::new(substitute_expr(left, map)),
            right: Box::new(substitute_expr(right, map)),
        },
        Expr::Assign {
            pos,
            op,
            target,
            value,
        } => Expr::Assign {
            pos: *pos,
            op: op.clone(),
            target: Box::new(substitute_expr(target, map)),
            value: Box::new(substitute_expr(value, map)),
        },
        Expr::Call { pos, callee, args } => Expr::Call {
            pos: *pos,
            callee: Box::new(substitute_expr(callee, map)),
            args: args.iter().map(|a| substitute_expr(a, map)).collect(),
        },
        Expr::New { pos, callee, args } => Expr::New {
            pos: *pos,
            callee: Box::new(substitute_expr(callee, map)),
            args: args.iter().map(|a| substitute_expr(a, map)).collect(),
        },
        Expr::Member {
            pos,
            object,
            property,
        } => Expr::Member {
            pos: *pos,
            object: Box::new(substitute_expr(object, map)),
            property: property.clone(),
        },
        Expr::Index { pos, object, index } => Expr::Index {
            pos: *pos,
            object: Box::new(substitute_expr(object, map)),
            index: Box::new(substitute_expr(index, map)),
        },
        Expr::Await { pos, operand } => Expr::Await {
            pos: *pos,
            operand: Box::new(substitute_expr(operand, map)),
        },
        Expr::Number { .. } | Expr::Str { .. } | Expr::Bool { .. } | Expr::Null { .. } => {
            expr.clone()
        }
    }
}

fn substitute_stmt(stmt: &Stmt, map: &HashMap<String, Expr>) -> Stmt {
    match stmt {
        Stmt::VarDecl {
            pos,
            kind,
            name,
            init,
        } => Stmt::VarDecl {
            pos: *pos,
            kind: kind.clone(),
            name: name.clone(),
            init: init.as_ref().map(|e| substitute_expr(e, map)),
        },
        Stmt::Expr { pos, expr } => Stmt::Expr {
            pos: *pos,
            expr: substitute_expr(expr, map),
        },
        Stmt::If {
            pos,
            test,
            consequent,
            alternate,
        } => Stmt::If {
            pos: *pos,
            test: substitute_expr(test, map),
            consequent: consequent.iter().map(|s| substitute_stmt(s, map)).collect(),
            alternate: alternate.iter().map(|s| substitute_stmt(s, map)).collect(),
        },
        Stmt::While { pos, test, body } => Stmt::While {
            pos: *pos,
            test: substitute_expr(test, map),
            body: body.iter().map(|s| substitute_stmt(s, map)).collect(),
        },
        Stmt::For {
            pos,
            init,
            test,
            update,
            body,
        } => Stmt::For {
            pos: *pos,
            init: init.as_ref().map(|s| Box::new(substitute_stmt(s, map))),
            test: test.as_ref().map(|e| substitute_expr(e, map)),
            update: update.as_ref().map(|e| substitute_expr(e, map)),
            body: body.iter().map(|s| substitute_stmt(s, map)).collect(),
        },
        Stmt::Block { pos, body } => Stmt::Block {
            pos: *pos,
            body: body.iter().map(|s| substitute_stmt(s, map)).collect(),
        },
        Stmt::FunctionDecl {
            pos,
            name,
            params,
            body,
            is_async,
        } => {
            let filtered: HashMap<String, Expr> = map
                .iter()
                .filter(|(key, _)| !params.contains(*key))
                .map(|(key, value)| (key.clone(), value.clone()))
                .collect();
            Stmt::FunctionDecl {
                pos: *pos,
                name: name.clone(),
                params: params.clone(),
                body: body
                    .iter()
                    .map(|s| substitute_stmt(s, &filtered))
                    .collect(),
                is_async: *is_async,
            }
        }
        Stmt::Return { pos, value } => Stmt::Return {
            pos: *pos,
            value: value.as_ref().map(|e| substitute_expr(e, map)),
        },
        Stmt::Empty { pos } => Stmt::Empty { pos: *pos },
    }
}

fn set_block_next(blocks: &mut Map<String, Value>, block_id: &str, next: Value) -> Result<()> {
    let block = blocks
        .get_mut(block_id)
        .ok_or_else(|| anyhow!("Missing block '{}'.", block_id))?;
    let obj = block
        .as_object_mut()
        .ok_or_else(|| anyhow!("Block '{}' is not an object.", block_id))?;
    obj.insert("next".to_string(), next);
    Ok(())
}

fn set_block_input(
    blocks: &mut Map<String, Value>,
    block_id: &str,
    key: &str,
    value: Value,
) -> Result<()> {
    let block = blocks
        .get_mut(block_id)
        .ok_or_else(|| anyhow!("Missing block '{}'.", block_id))?;
    let obj = block
        .as_object_mut()
        .ok_or_else(|| anyhow!("Block '{}' is not an object.", block_id))?;
    let inputs = obj
        .entry("inputs")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| anyhow!("Block '{}' has invalid inputs shape.", block_id))?;
    inputs.insert(key.to_string(), value);
    Ok(())
}

pub(crate) fn format_num(v: f64) -> String {
    if (v - v.round()).abs() < 1e-9 {
        format!("{}", v.round() as i64)
    } else {
        let s = format!("{:.6}", v);
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}

fn number_value(v: f64) -> Value {
    if (v - v.round()).abs() < 1e-9 {
        json!(v.round() as i64)
    } else {
        json!(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Position;

    fn ident(name: &str) -> Expr {
        Expr::Ident {
            pos: Position::new(1, 1),
            name: name.to_string(),
        }
    }

    fn num(value: f64) -> Expr {
        Expr::Number {
            pos: Position::new(1, 1),
            value,
        }
    }

    fn bin(op: &str, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            pos: Position::new(1, 1),
            op: op.to_string(),
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[test]
    fn negation_mirrors_comparisons() {
        let negated = negate_condition(&bin("<", ident("a"), num(5.0)));
        assert!(matches!(&negated, Expr::Binary { op, .. } if op == ">"));
        let negated = negate_condition(&bin("==", ident("a"), num(5.0)));
        assert!(matches!(&negated, Expr::Binary { op, .. } if op == "!="));
        let negated = negate_condition(&bin("<=", ident("a"), num(5.0)));
        assert!(matches!(&negated, Expr::Binary { op, .. } if op == ">="));
    }

    #[test]
    fn negation_wraps_non_comparisons() {
        let negated = negate_condition(&ident("flag"));
        assert!(matches!(&negated, Expr::Unary { op, .. } if op == "!"));
    }

    #[test]
    fn format_num_trims_float_noise() {
        assert_eq!(format_num(10.0), "10");
        assert_eq!(format_num(-4.0), "-4");
        assert_eq!(format_num(1.5), "1.5");
        assert_eq!(format_num(0.25), "0.25");
    }

    #[test]
    fn ident_operand_shapes_per_slot() {
        assert_eq!(
            ident_operand("n", OperandSlot::Arithmetic),
            json!([3, [12, "n", "n"], [4, ""]])
        );
        assert_eq!(
            ident_operand("n", OperandSlot::ComparisonLeftGt),
            json!([3, [12, "n", "n"], [10, ""]])
        );
        assert_eq!(
            ident_operand("n", OperandSlot::Comparison),
            json!([2, [12, "n", "n"]])
        );
    }

    #[test]
    fn inline_substitutes_and_defaults_missing_args() {
        let def = FunctionDef {
            params: vec!["a".to_string(), "b".to_string()],
            body: vec![Stmt::Return {
                pos: Position::new(1, 1),
                value: Some(bin("+", ident("a"), ident("b"))),
            }],
        };
        let inlined = inline_function(&def, &[num(40.0)]);
        let Expr::Binary { left, right, .. } = inlined else {
            panic!("expected a binary expression");
        };
        assert!(matches!(left.as_ref(), Expr::Number { value, .. } if *value == 40.0));
        assert!(matches!(right.as_ref(), Expr::Number { value, .. } if *value == 0.0));
    }

    #[test]
    fn inline_without_return_yields_zero() {
        let def = FunctionDef {
            params: vec![],
            body: vec![],
        };
        assert!(matches!(
            inline_function(&def, &[]),
            Expr::Number { value, .. } if value == 0.0
        ));
    }

    #[test]
    fn simple_for_requires_matching_counter() {
        let init = Some(Box::new(Stmt::VarDecl {
            pos: Position::new(1, 1),
            kind: "let".to_string(),
            name: "i".to_string(),
            init: Some(num(0.0)),
        }));
        let test = Some(bin("<", ident("i"), num(10.0)));
        let update = Some(Expr::Update {
            pos: Position::new(1, 1),
            op: "++".to_string(),
            prefix: false,
            target: Box::new(ident("i")),
        });
        assert!(match_simple_for(&init, &test, &update).is_some());

        let wrong_counter = Some(bin("<", ident("j"), num(10.0)));
        assert!(match_simple_for(&init, &wrong_counter, &update).is_none());

        let wrong_rel = Some(bin(">", ident("i"), num(10.0)));
        assert!(match_simple_for(&init, &wrong_rel, &update).is_none());
    }
}
