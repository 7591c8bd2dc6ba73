//! Compiler adapter: lowers generated component modules into plain scripts.
//!
//! The generated dialect is JavaScript with JSX markup and ES module
//! import/export syntax. A bare V8 isolate executes neither, so compilation
//! performs three source-to-source passes:
//!
//! 1. import declarations are checked against the fixed module allow-list and
//!    rewritten to bindings of the injected rendering primitives;
//! 2. `export` declarations are rewritten to module export-slot assignments;
//! 3. JSX markup is lowered to `__aiui.h(...)` calls, preserving expression
//!    evaluation order and tree structure.
//!
//! Anything the passes cannot account for is rejected here rather than
//! partially executed. V8-level syntax errors and the callable-entry check
//! are still compile-class failures, but they surface from the execution
//! host's evaluate/resolve phases.

use std::sync::OnceLock;

use regex::Regex;

use aiui_common::{Result, SandboxError};

/// Module names generated code may import, and the prelude binding each one
/// resolves to. Everything else fails compilation.
const ALLOWED_MODULES: &[(&str, &str)] = &[("ui", "__aiui.ui"), ("ui/jsx-runtime", "__aiui.ui")];

/// Executable artifact derived from one source payload. Consumed by exactly
/// one mount and never reused across render cycles.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    script: String,
}

impl CompiledUnit {
    /// The lowered script shipped across the isolation boundary.
    pub fn script(&self) -> &str {
        &self.script
    }
}

/// Lower one source payload into a [`CompiledUnit`].
pub fn compile(source: &str) -> Result<CompiledUnit> {
    if dynamic_import_re().is_match(source) {
        return Err(SandboxError::Compile(
            "dynamic import() is not allowed in generated code".to_string(),
        ));
    }
    let without_imports = rewrite_imports(source)?;
    let without_exports = rewrite_exports(&without_imports);
    let script = JsxLowering::new(&without_exports).lower()?;
    Ok(CompiledUnit { script })
}

fn static_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("static regex"))
}

fn dynamic_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r"\bimport\s*\(")
}

fn side_effect_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r#"^\s*import\s*["']([^"']+)["']\s*;?\s*$"#)
}

fn from_import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    static_regex(&RE, r#"^\s*import\s+(.+?)\s+from\s*["']([^"']+)["']\s*;?\s*$"#)
}

fn resolve_module(name: &str) -> Option<&'static str> {
    ALLOWED_MODULES
        .iter()
        .find(|(module, _)| *module == name)
        .map(|(_, target)| *target)
}

/// Pass 1: resolve import declarations against the allow-list. Declarations
/// are expected one per line, the way generated modules are written.
fn rewrite_imports(source: &str) -> Result<String> {
    let mut out = String::with_capacity(source.len());
    for line in source.lines() {
        if let Some(caps) = side_effect_import_re().captures(line) {
            let module = &caps[1];
            if resolve_module(module).is_none() {
                return Err(disallowed_import(module));
            }
            // Allowed side-effect imports bind nothing.
            continue;
        }
        if let Some(caps) = from_import_re().captures(line) {
            let module = caps[2].to_string();
            let Some(target) = resolve_module(&module) else {
                return Err(disallowed_import(&module));
            };
            out.push_str(&lower_import_clause(caps[1].trim(), target)?);
            out.push('\n');
            continue;
        }
        out.push_str(line);
        out.push('\n');
    }
    Ok(out)
}

fn disallowed_import(module: &str) -> SandboxError {
    SandboxError::Compile(format!("disallowed import \"{module}\""))
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// `React, { useState, useEffect as effect }` -> const bindings against the
/// prelude target.
fn lower_import_clause(clause: &str, target: &str) -> Result<String> {
    let mut bindings = Vec::new();
    let mut rest = clause.trim();

    if !rest.is_empty() && !rest.starts_with('{') && !rest.starts_with('*') {
        let (default_name, tail) = match rest.split_once(',') {
            Some((name, tail)) => (name.trim(), tail.trim()),
            None => (rest, ""),
        };
        if !is_identifier(default_name) {
            return Err(SandboxError::Compile(format!(
                "unsupported import clause \"{clause}\""
            )));
        }
        bindings.push(format!("const {default_name} = {target};"));
        rest = tail;
    }

    if let Some(namespace) = rest.strip_prefix('*') {
        let name = namespace.trim().strip_prefix("as").map(str::trim);
        match name {
            Some(name) if is_identifier(name) => {
                bindings.push(format!("const {name} = {target};"));
            }
            _ => {
                return Err(SandboxError::Compile(format!(
                    "unsupported import clause \"{clause}\""
                )))
            }
        }
    } else if let Some(named) = rest.strip_prefix('{') {
        let Some(named) = named.trim_end().strip_suffix('}') else {
            return Err(SandboxError::Compile(format!(
                "unsupported import clause \"{clause}\""
            )));
        };
        let mut fields = Vec::new();
        for item in named.split(',') {
            let item = item.trim();
            if item.is_empty() {
                continue;
            }
            match item.split_once(" as ") {
                Some((original, alias)) => {
                    fields.push(format!("{}: {}", original.trim(), alias.trim()))
                }
                None => fields.push(item.to_string()),
            }
        }
        if !fields.is_empty() {
            bindings.push(format!("const {{ {} }} = {};", fields.join(", "), target));
        }
    } else if !rest.is_empty() {
        return Err(SandboxError::Compile(format!(
            "unsupported import clause \"{clause}\""
        )));
    }

    Ok(bindings.join(" "))
}

/// Pass 2: rewrite export declarations onto the prelude's module slots.
fn rewrite_exports(source: &str) -> String {
    static DEFAULT_RE: OnceLock<Regex> = OnceLock::new();
    static DECL_RE: OnceLock<Regex> = OnceLock::new();
    static LIST_RE: OnceLock<Regex> = OnceLock::new();

    let default_re = static_regex(&DEFAULT_RE, r"(?m)^(\s*)export\s+default\s+");
    let decl_re = static_regex(
        &DECL_RE,
        r"(?m)^(\s*)export\s+(async\s+function|function|class|const|let|var)\s+([A-Za-z_$][A-Za-z0-9_$]*)",
    );
    let list_re = static_regex(&LIST_RE, r"(?m)^(\s*)export\s*\{([^}]*)\}\s*;?\s*$");

    let out = default_re.replace_all(source, "${1}__aiui.module.exports.default = ");

    // Named declarations keep their binding (so later references still work)
    // and get re-exported at the end of the script.
    let mut exported = Vec::new();
    let out = decl_re.replace_all(&out, |caps: &regex::Captures<'_>| {
        exported.push(caps[3].to_string());
        format!("{}{} {}", &caps[1], &caps[2], &caps[3])
    });

    let mut out = list_re
        .replace_all(&out, |caps: &regex::Captures<'_>| {
            let mut assignments = String::new();
            for item in caps[2].split(',') {
                let item = item.trim();
                if item.is_empty() {
                    continue;
                }
                let (local, slot) = match item.split_once(" as ") {
                    Some((local, alias)) => (local.trim(), alias.trim()),
                    None => (item, item),
                };
                assignments.push_str(&format!(
                    "{}__aiui.module.exports.{slot} = {local};\n",
                    &caps[1]
                ));
            }
            assignments
        })
        .into_owned();

    for name in exported {
        out.push_str(&format!("\n__aiui.module.exports.{name} = {name};"));
    }
    out
}

/// Pass 3: recursive-descent JSX lowering.
struct JsxLowering {
    chars: Vec<char>,
    pos: usize,
}

impl JsxLowering {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn lower(mut self) -> Result<String> {
        let mut out = String::with_capacity(self.chars.len());
        self.scan_code(&mut out, false)?;
        Ok(out)
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> char {
        let ch = self.chars[self.pos];
        self.pos += 1;
        ch
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.err_at(&format!("expected '{expected}'")))
        }
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn err_at(&self, message: &str) -> SandboxError {
        let line = self.chars[..self.pos.min(self.chars.len())]
            .iter()
            .filter(|&&c| c == '\n')
            .count()
            + 1;
        SandboxError::Compile(format!("{message} (line {line})"))
    }

    /// Copy JavaScript into `out`, lowering JSX found in expression position.
    /// With `stop_at_brace`, returns (without consuming) at the first
    /// unbalanced `}`.
    fn scan_code(&mut self, out: &mut String, stop_at_brace: bool) -> Result<()> {
        let mut depth = 0usize;
        while let Some(ch) = self.peek() {
            match ch {
                '"' | '\'' => self.copy_string(out)?,
                '`' => self.copy_template(out)?,
                '/' if self.peek_at(1) == Some('/') => self.copy_line_comment(out),
                '/' if self.peek_at(1) == Some('*') => self.copy_block_comment(out)?,
                '{' => {
                    depth += 1;
                    out.push(self.bump());
                }
                '}' => {
                    if depth == 0 && stop_at_brace {
                        return Ok(());
                    }
                    depth = depth.saturating_sub(1);
                    out.push(self.bump());
                }
                '<' if self.jsx_starts_here(out) => {
                    let lowered = self.parse_element()?;
                    out.push_str(&lowered);
                }
                _ => out.push(self.bump()),
            }
        }
        if stop_at_brace {
            Err(self.err_at("unterminated expression"))
        } else {
            Ok(())
        }
    }

    /// `<` begins markup only in expression position; otherwise it is a
    /// comparison operator.
    fn jsx_starts_here(&self, out: &str) -> bool {
        let next_ok = matches!(
            self.peek_at(1),
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' || c == '>'
        );
        if !next_ok {
            return false;
        }
        expression_position(out)
    }

    fn copy_string(&mut self, out: &mut String) -> Result<()> {
        let quote = self.bump();
        out.push(quote);
        while let Some(ch) = self.peek() {
            let ch = self.bump();
            out.push(ch);
            if ch == '\\' {
                if let Some(escaped) = self.peek() {
                    out.push(escaped);
                    self.pos += 1;
                }
                continue;
            }
            if ch == quote {
                return Ok(());
            }
        }
        Err(self.err_at("unterminated string literal"))
    }

    fn copy_template(&mut self, out: &mut String) -> Result<()> {
        out.push(self.bump()); // backtick
        while let Some(ch) = self.peek() {
            if ch == '\\' {
                out.push(self.bump());
                if self.peek().is_some() {
                    out.push(self.bump());
                }
                continue;
            }
            if ch == '`' {
                out.push(self.bump());
                return Ok(());
            }
            if ch == '$' && self.peek_at(1) == Some('{') {
                out.push(self.bump());
                out.push(self.bump());
                self.scan_code(out, true)?;
                self.expect('}')?;
                out.push('}');
                continue;
            }
            out.push(self.bump());
        }
        Err(self.err_at("unterminated template literal"))
    }

    fn copy_line_comment(&mut self, out: &mut String) {
        while let Some(ch) = self.peek() {
            if ch == '\n' {
                break;
            }
            out.push(self.bump());
        }
    }

    fn copy_block_comment(&mut self, out: &mut String) -> Result<()> {
        out.push(self.bump());
        out.push(self.bump());
        while self.peek().is_some() {
            if self.peek() == Some('*') && self.peek_at(1) == Some('/') {
                out.push(self.bump());
                out.push(self.bump());
                return Ok(());
            }
            out.push(self.bump());
        }
        Err(self.err_at("unterminated comment"))
    }

    /// Parse one element (or fragment) starting at `<`; returns the lowered
    /// `__aiui.h(...)` call.
    fn parse_element(&mut self) -> Result<String> {
        self.expect('<')?;

        if self.peek() == Some('>') {
            self.pos += 1;
            let children = self.parse_children(None)?;
            return Ok(render_call("__aiui.Fragment", Vec::new(), children));
        }

        let tag = self.read_tag_name()?;
        let type_expr = tag_type_expr(&tag);
        let mut props = Vec::new();

        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(self.err_at("unterminated element")),
                Some('/') => {
                    self.pos += 1;
                    self.expect('>')?;
                    return Ok(render_call(&type_expr, props, Vec::new()));
                }
                Some('>') => {
                    self.pos += 1;
                    break;
                }
                Some('{') => {
                    self.pos += 1;
                    self.skip_ws();
                    if self.peek() == Some('.') && self.peek_at(1) == Some('.') && self.peek_at(2) == Some('.')
                    {
                        self.pos += 3;
                        let expr = self.collect_expr()?;
                        self.expect('}')?;
                        props.push(format!("...{}", expr.trim()));
                    } else {
                        return Err(self.err_at("expected spread attribute"));
                    }
                }
                _ => {
                    let name = self.read_attr_name()?;
                    self.skip_ws();
                    if self.peek() == Some('=') {
                        self.pos += 1;
                        self.skip_ws();
                        let value = match self.peek() {
                            Some('"') | Some('\'') => self.read_quoted_attr()?,
                            Some('{') => {
                                self.pos += 1;
                                let expr = self.collect_expr()?;
                                self.expect('}')?;
                                expr.trim().to_string()
                            }
                            _ => return Err(self.err_at("expected attribute value")),
                        };
                        props.push(format!("\"{name}\": {value}"));
                    } else {
                        props.push(format!("\"{name}\": true"));
                    }
                }
            }
        }

        let children = self.parse_children(Some(&tag))?;
        Ok(render_call(&type_expr, props, children))
    }

    /// Child content up to the matching closing tag (`None` for fragments).
    fn parse_children(&mut self, closing: Option<&str>) -> Result<Vec<String>> {
        let mut children = Vec::new();
        let mut text = String::new();
        loop {
            match self.peek() {
                None => return Err(self.err_at("unclosed element")),
                Some('<') if self.peek_at(1) == Some('/') => {
                    flush_text(&mut text, &mut children);
                    self.pos += 2;
                    self.skip_ws();
                    let name = if self.peek() == Some('>') {
                        String::new()
                    } else {
                        self.read_tag_name()?
                    };
                    self.skip_ws();
                    self.expect('>')?;
                    let expected = closing.unwrap_or("");
                    if name != expected {
                        return Err(self.err_at(&format!("mismatched closing tag </{name}>")));
                    }
                    return Ok(children);
                }
                Some('<') => {
                    flush_text(&mut text, &mut children);
                    children.push(self.parse_element()?);
                }
                Some('{') => {
                    flush_text(&mut text, &mut children);
                    self.pos += 1;
                    let expr = self.collect_expr()?;
                    self.expect('}')?;
                    let expr = expr.trim();
                    if !is_trivial_expr(expr) {
                        children.push(expr.to_string());
                    }
                }
                Some(_) => text.push(self.bump()),
            }
        }
    }

    /// A braced expression, recursively lowered (nested JSX included). Leaves
    /// the closing `}` for the caller.
    fn collect_expr(&mut self) -> Result<String> {
        let mut expr = String::new();
        self.scan_code(&mut expr, true)?;
        Ok(expr)
    }

    fn read_tag_name(&mut self) -> Result<String> {
        let mut name = String::new();
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => name.push(self.bump()),
            _ => return Err(self.err_at("expected tag name")),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.' || c == '-' {
                name.push(self.bump());
            } else {
                break;
            }
        }
        Ok(name)
    }

    fn read_attr_name(&mut self) -> Result<String> {
        let mut name = String::new();
        match self.peek() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => name.push(self.bump()),
            _ => return Err(self.err_at("expected attribute name")),
        }
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '-' || c == ':' {
                name.push(self.bump());
            } else {
                break;
            }
        }
        Ok(name)
    }

    /// Quoted attribute value, emitted verbatim as a JS string literal.
    fn read_quoted_attr(&mut self) -> Result<String> {
        let quote = self.bump();
        let mut value = String::new();
        value.push(quote);
        while let Some(ch) = self.peek() {
            let ch = self.bump();
            value.push(ch);
            if ch == quote {
                return Ok(value);
            }
        }
        Err(self.err_at("unterminated attribute value"))
    }
}

/// Lowercase tags are intrinsic (string-typed); capitalized or dotted names
/// are component references.
fn tag_type_expr(tag: &str) -> String {
    let intrinsic = tag
        .chars()
        .next()
        .map(|c| c.is_ascii_lowercase())
        .unwrap_or(false)
        && !tag.contains('.');
    if intrinsic {
        format!("\"{tag}\"")
    } else {
        tag.to_string()
    }
}

fn render_call(type_expr: &str, props: Vec<String>, children: Vec<String>) -> String {
    let props_expr = if props.is_empty() {
        "null".to_string()
    } else {
        format!("{{ {} }}", props.join(", "))
    };
    let mut call = format!("__aiui.h({type_expr}, {props_expr}");
    for child in children {
        call.push_str(", ");
        call.push_str(&child);
    }
    call.push(')');
    call
}

fn flush_text(buffer: &mut String, children: &mut Vec<String>) {
    let collapsed = collapse_jsx_text(buffer);
    if !collapsed.is_empty() {
        children.push(js_string_literal(&collapsed));
    }
    buffer.clear();
}

/// JSX whitespace: runs containing a newline collapse away at chunk edges and
/// to a single space between words; same-line spaces are significant.
fn collapse_jsx_text(raw: &str) -> String {
    let mut out = String::new();
    let mut pending: Option<bool> = None; // Some(run contains newline)
    for ch in raw.chars() {
        if ch.is_whitespace() {
            let newline = ch == '\n' || ch == '\r';
            pending = Some(pending.map_or(newline, |p| p || newline));
        } else {
            match pending.take() {
                Some(true) if out.is_empty() => {}
                Some(_) if !out.is_empty() => out.push(' '),
                Some(false) => out.push(' '),
                _ => {}
            }
            out.push(ch);
        }
    }
    if pending == Some(false) && !out.is_empty() {
        out.push(' ');
    }
    out
}

fn js_string_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 2);
    out.push('"');
    for ch in text.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('"');
    out
}

/// `{ /* comment */ }` children disappear, like JSX comments.
fn is_trivial_expr(expr: &str) -> bool {
    let mut rest = expr.trim();
    loop {
        if rest.is_empty() {
            return true;
        }
        if let Some(tail) = rest.strip_prefix("/*") {
            match tail.find("*/") {
                Some(end) => rest = tail[end + 2..].trim_start(),
                None => return false,
            }
        } else {
            return false;
        }
    }
}

/// Whether `<` after the code emitted so far can begin markup.
fn expression_position(out: &str) -> bool {
    let trimmed = out.trim_end();
    let Some(prev) = trimmed.chars().last() else {
        return true;
    };
    if "([{,;=?:&|!".contains(prev) {
        return true;
    }
    if prev == '>' && trimmed.ends_with("=>") {
        return true;
    }
    let word: String = trimmed
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .chars()
        .rev()
        .collect();
    if word.is_empty() || !trimmed.ends_with(&word) {
        return false;
    }
    let before = trimmed[..trimmed.len() - word.len()].chars().last();
    let bounded = !matches!(before, Some(c) if c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
    bounded
        && matches!(
            word.as_str(),
            "return" | "yield" | "await" | "typeof" | "case" | "do" | "else" | "in" | "of"
                | "new" | "void" | "delete"
        )
}
