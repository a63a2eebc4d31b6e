//! Fortran source parsing for dependency extraction.
//!
//! A hand-rolled statement scanner, not a full Fortran front end: it
//! understands free-form comments, `&` continuations, `;` statement
//! separators, the handful of statements that create module edges
//! (`use`, `module`, `submodule`, `include`) and enough of the
//! preprocessor to honor `#ifdef`/`#ifndef` branches. Unlike the C
//! scanner, conditional compilation IS evaluated here: a `use` inside a
//! false branch creates no dependency. `#if`/`#elif` conditions are
//! never evaluated, so every such branch is taken.
//!
//! `include` statements are parsed inline through recursion; the call
//! stack is the file-inclusion stack, bounded by a depth limit rather
//! than a visited set, so re-including a file re-parses it.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

/// Nested includes beyond this depth are recorded but not descended
/// into. Guards against `include` cycles, which the grammar otherwise
/// permits.
const MAX_INCLUDE_DEPTH: usize = 100;

/// Everything learned from parsing one source file. One per
/// (object, source) pair; read-only once parsing completes.
#[derive(Debug, Default, Clone)]
pub struct SourceInfo {
    pub source: String,
    /// Resolved paths of included files.
    pub includes: BTreeSet<String>,
    /// Module file names this source needs (`alpha.mod`,
    /// `parent@sub.smod`), lower-cased, no path.
    pub requires: BTreeSet<String>,
    /// Module file names this source defines.
    pub provides: BTreeSet<String>,
    /// Intrinsic modules referenced via `use, intrinsic ::`. Assumed
    /// always available; never resolved.
    pub intrinsics: BTreeSet<String>,
}

pub struct FortranParser<'a> {
    include_path: &'a [String],
    pp_defs: BTreeSet<String>,
    smod_sep: String,
    smod_ext: String,
    info: &'a mut SourceInfo,
    in_interface: bool,
    /// Depth of nested preprocessor branches whose condition was false.
    /// Non-zero suppresses every rule callback.
    pp_false_depth: u32,
    /// One flag per open branch: true once a branch of this
    /// `#if`-chain has been taken, so `#elif`/`#else` must skip.
    skip_to_end: Vec<bool>,
}

impl<'a> FortranParser<'a> {
    pub fn new(
        include_path: &'a [String],
        pp_defs: BTreeSet<String>,
        smod_sep: &str,
        smod_ext: &str,
        info: &'a mut SourceInfo,
    ) -> Self {
        Self {
            include_path,
            pp_defs,
            smod_sep: smod_sep.to_string(),
            smod_ext: smod_ext.to_string(),
            info,
            in_interface: false,
            pp_false_depth: 0,
            skip_to_end: Vec::new(),
        }
    }

    /// Parse one translation unit, descending into `include`d files.
    pub fn parse_file(&mut self, path: &str) -> Result<()> {
        self.parse_at_depth(path, 0)
    }

    fn parse_at_depth(&mut self, path: &str, depth: usize) -> Result<()> {
        let content = fs::read(Path::new(path))
            .with_context(|| format!("Cannot read Fortran source \"{path}\""))?;
        let content = String::from_utf8_lossy(&content);
        let dir = crate::parent_dir(path);

        let mut pending = String::new();
        for raw in content.lines() {
            let line = raw.trim_end_matches('\r');
            if pending.is_empty() && line.trim_start().starts_with('#') {
                self.preprocessor_line(line.trim_start(), &dir, depth);
                continue;
            }
            let code = strip_comment(line);
            let piece = code.trim();
            let piece = piece.strip_prefix('&').unwrap_or(piece).trim_start();
            if let Some(continued) = piece.strip_suffix('&') {
                pending.push_str(continued);
                continue;
            }
            pending.push_str(piece);
            let stmt = std::mem::take(&mut pending);
            for s in stmt.split(';') {
                self.statement(s.trim(), &dir, depth);
            }
        }
        for s in pending.split(';') {
            self.statement(s.trim(), &dir, depth);
        }
        Ok(())
    }

    fn statement(&mut self, stmt: &str, dir: &str, depth: usize) {
        let Some((word, rest)) = split_word(stmt) else {
            return;
        };
        match word.as_str() {
            "use" => self.rule_use(rest),
            "module" => self.rule_module(rest),
            "submodule" => self.rule_submodule(rest),
            "include" => {
                if let Some(name) = quoted_name(rest) {
                    self.rule_include(&name, dir, depth);
                }
            }
            "interface" => self.set_in_interface(true),
            "abstract" => {
                if let Some((w2, _)) = split_word(rest)
                    && w2 == "interface"
                {
                    self.set_in_interface(true);
                }
            }
            "end" => {
                if let Some((w2, _)) = split_word(rest)
                    && w2 == "interface"
                {
                    self.set_in_interface(false);
                }
            }
            "endinterface" => self.set_in_interface(false),
            _ => {}
        }
    }

    fn set_in_interface(&mut self, value: bool) {
        if self.pp_false_depth == 0 {
            self.in_interface = value;
        }
    }

    fn rule_use(&mut self, rest: &str) {
        if self.pp_false_depth > 0 {
            return;
        }
        let rest = rest.trim_start();
        let mut intrinsic = false;
        let name_part = match rest.split_once("::") {
            Some((attrs, after)) => {
                let attrs = attrs.to_lowercase();
                if attrs.contains("intrinsic") && !attrs.contains("non_intrinsic") {
                    intrinsic = true;
                }
                after
            }
            None => rest,
        };
        let name = identifier(name_part.trim_start());
        if name.is_empty() {
            return;
        }
        if intrinsic {
            self.info.intrinsics.insert(self.mod_name(&name));
        } else {
            self.info.requires.insert(self.mod_name(&name));
        }
    }

    fn rule_module(&mut self, rest: &str) {
        if self.pp_false_depth > 0 {
            return;
        }
        let name = identifier(rest.trim_start());
        if name.is_empty() {
            return;
        }
        // "module procedure" and the separate-module-subprogram forms
        // define no module of their own.
        if matches!(
            name.to_lowercase().as_str(),
            "procedure" | "function" | "subroutine" | "pure" | "elemental" | "recursive"
        ) {
            return;
        }
        if !self.in_interface {
            self.info.provides.insert(self.mod_name(&name));
        }
    }

    /// `submodule (parent) name` requires `parent.mod`;
    /// `submodule (parent:ancestor) name` requires the ancestor's
    /// submodule file. Either form provides `parent@name.smod`.
    fn rule_submodule(&mut self, rest: &str) {
        if self.pp_false_depth > 0 {
            return;
        }
        let rest = rest.trim_start();
        let Some(open) = rest.strip_prefix('(') else {
            return;
        };
        let Some(close) = open.find(')') else {
            return;
        };
        let parents = &open[..close];
        let name = identifier(open[close + 1..].trim_start());
        if name.is_empty() {
            return;
        }
        match parents.split_once(':') {
            Some((parent, ancestor)) => {
                let parent = identifier(parent.trim());
                let ancestor = identifier(ancestor.trim());
                self.info.requires.insert(self.smod_name(&parent, &ancestor));
                self.info.provides.insert(self.smod_name(&parent, &name));
            }
            None => {
                let parent = identifier(parents.trim());
                self.info.requires.insert(self.mod_name(&parent));
                self.info.provides.insert(self.smod_name(&parent, &name));
            }
        }
    }

    fn rule_include(&mut self, name: &str, dir: &str, depth: usize) {
        if self.pp_false_depth > 0 {
            return;
        }
        // An unresolvable include is ignored: either the source will not
        // compile anyway or the user does not care to depend on it.
        if let Some(full) = self.find_include_file(dir, name) {
            self.info.includes.insert(full.clone());
            if depth < MAX_INCLUDE_DEPTH {
                // Translate the included source inline. Read errors at
                // this point mean the file vanished mid-scan; skip it.
                let _ = self.parse_at_depth(&full, depth + 1);
            }
        }
    }

    /// The including file's own directory is always the first search
    /// location, then the include path in order.
    fn find_include_file(&self, dir: &str, name: &str) -> Option<String> {
        if crate::is_full_path(name) {
            return crate::file_exists(name).then(|| name.to_string());
        }
        let beside = crate::join_path(dir, name);
        if crate::file_exists(&beside) {
            return Some(beside);
        }
        for ip in self.include_path {
            let candidate = crate::join_path(ip, name);
            if crate::file_exists(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    fn preprocessor_line(&mut self, line: &str, dir: &str, depth: usize) {
        let body = line.trim_start_matches('#').trim_start();
        let Some((directive, rest)) = split_word(body) else {
            return;
        };
        match directive.as_str() {
            "include" => {
                if let Some(name) = bracketed_or_quoted_name(rest) {
                    self.rule_include(&name, dir, depth);
                }
            }
            "define" => {
                if self.pp_false_depth == 0 {
                    let name = macro_name(rest);
                    if !name.is_empty() {
                        self.pp_defs.insert(name);
                    }
                }
            }
            "undef" => {
                if self.pp_false_depth == 0 {
                    self.pp_defs.remove(&macro_name(rest));
                }
            }
            "ifdef" => self.rule_ifdef(&macro_name(rest), false),
            "ifndef" => self.rule_ifdef(&macro_name(rest), true),
            "if" => {
                // Conditions are not evaluated; the branch is taken and
                // never marks the chain as satisfied, so any later
                // #elif/#else branches are taken too.
                self.skip_to_end.push(false);
            }
            "elif" => {
                if self.skip_to_end.last() == Some(&true) && self.pp_false_depth == 0 {
                    self.pp_false_depth = 1;
                }
            }
            "else" => self.rule_else(),
            "endif" => self.rule_endif(),
            _ => {}
        }
    }

    fn rule_ifdef(&mut self, name: &str, negate: bool) {
        self.skip_to_end.push(false);
        if self.pp_false_depth > 0 {
            self.pp_false_depth += 1;
        } else if self.pp_defs.contains(name) == negate {
            self.pp_false_depth = 1;
        } else {
            *self.skip_to_end.last_mut().expect("branch just pushed") = true;
        }
    }

    fn rule_else(&mut self) {
        // A false parent branch stays false.
        if self.pp_false_depth > 1 {
            return;
        }
        if self.skip_to_end.last() == Some(&true) {
            self.pp_false_depth = 1;
        } else {
            self.pp_false_depth = 0;
        }
    }

    fn rule_endif(&mut self) {
        self.skip_to_end.pop();
        if self.pp_false_depth > 0 {
            self.pp_false_depth -= 1;
        }
    }

    fn mod_name(&self, name: &str) -> String {
        format!("{}.mod", name.to_lowercase())
    }

    fn smod_name(&self, parent: &str, sub: &str) -> String {
        let ext = if self.smod_ext.is_empty() {
            ".mod"
        } else {
            &self.smod_ext
        };
        if self.smod_sep.is_empty() {
            // No prefix: the compiler names submodule files by the
            // submodule alone.
            format!("{}{ext}", sub.to_lowercase())
        } else {
            format!(
                "{}{}{}{ext}",
                parent.to_lowercase(),
                self.smod_sep,
                sub.to_lowercase()
            )
        }
    }
}

/// Truncate `line` at the first `!` that is outside a character literal.
fn strip_comment(line: &str) -> &str {
    let mut in_single = false;
    let mut in_double = false;
    for (i, c) in line.char_indices() {
        match c {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            '!' if !in_single && !in_double => return &line[..i],
            _ => {}
        }
    }
    line
}

/// First whitespace-delimited word, lower-cased, with the remainder.
/// Commas bind to the word they follow (`use,intrinsic::m` splits after
/// `use`).
fn split_word(s: &str) -> Option<(String, &str)> {
    let s = s.trim_start();
    if s.is_empty() {
        return None;
    }
    let end = s
        .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
        .unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    Some((s[..end].to_lowercase(), &s[end..]))
}

/// Leading identifier characters of `s`.
fn identifier(s: &str) -> String {
    s.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// `'name'` or `"name"`.
fn quoted_name(s: &str) -> Option<String> {
    let s = s.trim();
    let quote = s.chars().next().filter(|c| *c == '\'' || *c == '"')?;
    let inner = &s[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_string())
}

/// `"name"`, `'name'` or `<name>` for preprocessor includes.
fn bracketed_or_quoted_name(s: &str) -> Option<String> {
    let s = s.trim();
    if let Some(inner) = s.strip_prefix('<') {
        let end = inner.find('>')?;
        return Some(inner[..end].to_string());
    }
    quoted_name(s)
}

/// Macro name for #define/#undef/#ifdef: identifier up to whitespace or
/// an argument list.
fn macro_name(s: &str) -> String {
    identifier(s.trim_start())
}
