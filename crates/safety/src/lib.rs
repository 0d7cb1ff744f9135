// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Safety Checker (§4.B): a syntactic, non-sandboxing scan for calls that
//! shell out, eval, or dynamically import. Parses with a real Python
//! grammar rather than a hand-rolled tokenizer; on a syntax error the
//! interpreter will surface it later, so this returns no violations.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use std::collections::HashMap;

use ruff_python_ast::visitor::{walk_expr, walk_stmt, Visitor};
use ruff_python_ast::{Expr, ModModule, Stmt};
use ruff_text_size::Ranged;

/// One forbidden call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityViolation {
    pub name: String,
    pub lineno: u32,
    pub col: u32,
}

impl std::fmt::Display for SecurityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (line {})", self.name, self.lineno)
    }
}

/// The banned call set (§4.B). Resolution happens after import aliasing,
/// so `os.system` is caught whether imported as `import os` or
/// `import os as o`; `compile` is banned but `re.compile` is not, since
/// resolution only ever substitutes the alias of the dotted head.
const BANNED_CALLS: &[&str] = &[
    "os.system",
    "os.popen",
    "os.spawnl",
    "os.spawnlp",
    "os.spawnv",
    "os.spawnvp",
    "subprocess.Popen",
    "subprocess.run",
    "subprocess.call",
    "subprocess.check_call",
    "subprocess.check_output",
    "eval",
    "__import__",
    "compile",
];

/// Scan Python source for forbidden call sites.
///
/// Sorts violations by `(lineno, col, name)`. Returns an empty list if the
/// source doesn't parse.
pub fn check_code_safety(source: &str) -> Vec<SecurityViolation> {
    let parsed = match ruff_python_parser::parse_module(source) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::debug!(error = %err, "safety checker: source did not parse");
            return Vec::new();
        }
    };
    let module: &ModModule = parsed.syntax();

    let mut alias_collector = AliasCollector::default();
    alias_collector.visit_body(&module.body);
    let alias_map = alias_collector.alias_map;

    let mut call_collector = CallCollector::new(source, &alias_map);
    call_collector.visit_body(&module.body);

    let mut violations = call_collector.violations;
    violations.sort_by(|a, b| (a.lineno, a.col, &a.name).cmp(&(b.lineno, b.col, &b.name)));
    violations
}

fn dotted_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Name(name) => Some(name.id.to_string()),
        Expr::Attribute(attr) => {
            let base = dotted_name(&attr.value)?;
            Some(format!("{base}.{}", attr.attr.as_str()))
        }
        _ => None,
    }
}

fn resolve_call_name(func: &Expr, alias_map: &HashMap<String, String>) -> Option<String> {
    let raw = dotted_name(func)?;
    let mut parts = raw.splitn(2, '.');
    let head = parts.next()?;
    let rest = parts.next();
    match alias_map.get(head) {
        Some(mapped) => match rest {
            Some(rest) => Some(format!("{mapped}.{rest}")),
            None => Some(mapped.clone()),
        },
        None => Some(raw),
    }
}

/// Maps byte offset to a 1-based line and 0-based column, matching
/// Python's `lineno`/`col_offset` convention.
fn offset_to_line_col(source: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(source.len());
    let mut line: u32 = 1;
    let mut line_start = 0usize;
    for (idx, byte) in source.as_bytes()[..offset].iter().enumerate() {
        if *byte == b'\n' {
            line += 1;
            line_start = idx + 1;
        }
    }
    let col = source[line_start..offset].chars().count() as u32;
    (line, col)
}

#[derive(Default)]
struct AliasCollector {
    alias_map: HashMap<String, String>,
}

impl<'a> Visitor<'a> for AliasCollector {
    fn visit_stmt(&mut self, stmt: &'a Stmt) {
        match stmt {
            Stmt::Import(import) => {
                for alias in &import.names {
                    let local = alias
                        .asname
                        .as_ref()
                        .map(|n| n.as_str())
                        .unwrap_or_else(|| alias.name.as_str());
                    self.alias_map
                        .insert(local.to_string(), alias.name.to_string());
                }
            }
            Stmt::ImportFrom(import_from) => {
                if let Some(module) = &import_from.module {
                    for alias in &import_from.names {
                        if alias.name.as_str() == "*" {
                            continue;
                        }
                        let local = alias
                            .asname
                            .as_ref()
                            .map(|n| n.as_str())
                            .unwrap_or_else(|| alias.name.as_str());
                        self.alias_map.insert(
                            local.to_string(),
                            format!("{module}.{}", alias.name.as_str()),
                        );
                    }
                }
            }
            _ => {}
        }
        walk_stmt(self, stmt);
    }
}

struct CallCollector<'s> {
    source: &'s str,
    alias_map: &'s HashMap<String, String>,
    violations: Vec<SecurityViolation>,
}

impl<'s> CallCollector<'s> {
    fn new(source: &'s str, alias_map: &'s HashMap<String, String>) -> Self {
        Self {
            source,
            alias_map,
            violations: Vec::new(),
        }
    }
}

impl<'a, 's> Visitor<'a> for CallCollector<'s> {
    fn visit_expr(&mut self, expr: &'a Expr) {
        if let Expr::Call(call) = expr {
            if let Some(name) = resolve_call_name(&call.func, self.alias_map) {
                if BANNED_CALLS.contains(&name.as_str()) {
                    let (lineno, col) = offset_to_line_col(self.source, call.start().to_usize());
                    self.violations.push(SecurityViolation { name, lineno, col });
                }
            }
        }
        walk_expr(self, expr);
    }
}
