//! Best-effort naming from the call site.
//!
//! `call_site!`/`invoke!` record the stringified argument expressions together with
//! `file!()` and `line!()`. Output names and type hints are then read from the source
//! line and the enclosing `fn` signature. Nothing here fails: every problem degrades to
//! positional placeholders (`arg0`, `arg1`, ...) and a single `output` field.

use crate::models::{FieldType, split_top_level};
use crate::{Error, Result};
use dashmap::DashMap;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Output name used when the call is not assigned to anything.
pub const DEFAULT_OUTPUT: &str = "output";

const RESERVED_NAMES: [&str; 3] = ["self", "args", "kwargs"];

/// Lines longer than this are not parsed.
const MAX_SOURCE_LINE: usize = 1000;

/// How far above the call to look for the enclosing `fn`.
const SIGNATURE_SCAN_LINES: usize = 400;

static SOURCES: LazyLock<DashMap<PathBuf, Option<Arc<Vec<String>>>>> =
    LazyLock::new(DashMap::new);

static IDENT: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").ok());

static FN_HEAD: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\bfn\s+[A-Za-z_][A-Za-z0-9_]*").ok());

fn is_ident(s: &str) -> bool {
    IDENT.as_ref().is_some_and(|re| re.is_match(s)) && s != "_"
}

/// Where a call was made and what was passed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallSite {
    pub file: String,
    pub line: u32,
    pub manifest_dir: Option<String>,
    /// Argument expressions as written, one per positional argument.
    pub args: Vec<String>,
    source_line: Option<String>,
    signature: Option<String>,
}

impl CallSite {
    /// Used by [`call_site!`](crate::call_site). Source lookup is deferred until needed.
    pub fn capture(file: &str, line: u32, manifest_dir: Option<&str>, args: &[&str]) -> Self {
        Self {
            file: file.to_string(),
            line,
            manifest_dir: manifest_dir.map(str::to_string),
            args: args.iter().map(|a| a.to_string()).collect(),
            source_line: None,
            signature: None,
        }
    }

    /// A call site described directly by its source text.
    pub fn from_source_line(source_line: impl Into<String>, args: &[&str]) -> Self {
        Self {
            args: args.iter().map(|a| a.to_string()).collect(),
            source_line: Some(source_line.into()),
            ..Self::default()
        }
    }

    /// Attach the enclosing function signature, e.g. `fn answer(question: &str) -> String`.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// The statement text containing the call, if it can be found.
    pub fn source_line(&self) -> Option<String> {
        if let Some(line) = &self.source_line {
            return Some(line.clone());
        }
        let lines = self.source_file()?;
        let idx = (self.line as usize).checked_sub(1)?;
        let current = lines.get(idx)?.trim().to_string();
        // `let x =\n    invoke!(...)` puts the assignment on the previous line.
        if find_assignment(&current).is_none() {
            if let Some(prev) = idx.checked_sub(1).and_then(|i| lines.get(i)) {
                let prev = prev.trim();
                if prev.ends_with('=') && find_assignment(prev).is_some() {
                    return Some(format!("{prev} {current}"));
                }
            }
        }
        Some(current)
    }

    /// The nearest `fn` signature above the call.
    pub fn signature(&self) -> Option<String> {
        if let Some(sig) = &self.signature {
            return Some(sig.clone());
        }
        if self.source_line.is_some() {
            return None;
        }
        let lines = self.source_file()?;
        let idx = (self.line as usize).checked_sub(1)?;
        // A line past the end means the file changed since the call site was compiled.
        lines.get(idx)?;
        let fn_head = FN_HEAD.as_ref()?;
        let lower = idx.saturating_sub(SIGNATURE_SCAN_LINES);
        let start = (lower..=idx)
            .rev()
            .find(|&i| lines.get(i).is_some_and(|line| fn_head.is_match(line)))?;
        let mut sig = String::new();
        for line in lines.iter().skip(start).take(idx + 1 - start) {
            if let Some(pos) = line.find('{') {
                sig.push_str(&line[..pos]);
                return Some(sig.trim().to_string());
            }
            sig.push_str(line.trim());
            sig.push(' ');
        }
        None
    }

    fn source_file(&self) -> Option<Arc<Vec<String>>> {
        if self.file.is_empty() {
            return None;
        }
        let path = resolve_source_path(&self.file, self.manifest_dir.as_deref())?;
        if let Some(cached) = SOURCES.get(&path) {
            return cached.value().clone();
        }
        let loaded = std::fs::read_to_string(&path)
            .ok()
            .map(|s| Arc::new(s.lines().map(str::to_string).collect::<Vec<_>>()));
        if loaded.is_none() {
            tracing::debug!(path = %path.display(), "call site source unavailable");
        }
        SOURCES.insert(path, loaded.clone());
        loaded
    }
}

fn resolve_source_path(file: &str, manifest_dir: Option<&str>) -> Option<PathBuf> {
    let file = Path::new(file);
    if file.is_file() {
        return Some(file.to_path_buf());
    }
    let manifest = Path::new(manifest_dir?);
    // `file!()` is relative to the workspace root, which may sit above the crate.
    manifest
        .ancestors()
        .map(|dir| dir.join(file))
        .find(|candidate| candidate.is_file())
}

/// Final names and type hints for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedNames {
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub input_types: BTreeMap<String, FieldType>,
    pub output_types: BTreeMap<String, FieldType>,
}

/// Combine explicit names with call-site inference.
///
/// Explicit `inputs` must match `arg_count`; explicit `outputs` are used as given.
#[tracing::instrument(level = "debug", skip(explicit_inputs, explicit_outputs, call_site))]
pub fn resolve(
    arg_count: usize,
    explicit_inputs: Option<&[String]>,
    explicit_outputs: Option<&[String]>,
    call_site: Option<&CallSite>,
) -> Result<ResolvedNames> {
    let inputs = match explicit_inputs {
        Some(names) => {
            if names.len() != arg_count {
                return Err(Error::Validation(format!(
                    "Expected {arg_count} input names, got {}",
                    names.len()
                )));
            }
            names.to_vec()
        }
        None => infer_input_names(arg_count, call_site.map(|c| c.args.as_slice())),
    };
    let outputs = match explicit_outputs {
        Some(names) => names.to_vec(),
        None => infer_output_names(
            call_site
                .and_then(CallSite::source_line)
                .as_deref()
                .unwrap_or(""),
        ),
    };
    let (input_types, output_types) = match call_site.and_then(CallSite::signature) {
        Some(sig) => type_hints_from_signature(&sig, &inputs, &outputs),
        None => (BTreeMap::new(), BTreeMap::new()),
    };
    Ok(ResolvedNames {
        inputs,
        outputs,
        input_types,
        output_types,
    })
}

fn placeholders(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("arg{i}")).collect()
}

/// Names for `arg_count` positional arguments from their source expressions.
///
/// Bare identifiers and `self.field` accesses name themselves; anything else, a
/// reserved name or a repeat of an earlier name becomes `arg{i}`.
pub fn infer_input_names(arg_count: usize, exprs: Option<&[String]>) -> Vec<String> {
    let Some(exprs) = exprs.filter(|e| e.len() == arg_count) else {
        return placeholders(arg_count);
    };
    let mut names: Vec<String> = Vec::with_capacity(arg_count);
    for (i, expr) in exprs.iter().enumerate() {
        let name = arg_name(expr)
            .filter(|n| !RESERVED_NAMES.contains(&n.as_str()))
            .filter(|n| !names.contains(n))
            .unwrap_or_else(|| format!("arg{i}"));
        names.push(name);
    }
    names
}

fn arg_name(expr: &str) -> Option<String> {
    let mut e = expr.trim();
    loop {
        let stripped = e
            .strip_prefix("&mut ")
            .or_else(|| e.strip_prefix('&'))
            .or_else(|| e.strip_prefix('*'))
            .map(str::trim_start);
        match stripped {
            Some(s) => e = s,
            None => break,
        }
    }
    if is_ident(e) {
        return Some(e.to_string());
    }
    let attr = e.strip_prefix("self.")?.trim();
    is_ident(attr).then(|| attr.to_string())
}

/// Output names from the assignment target of `line`.
///
/// `a = f(..)` and `let a = f(..)` give `["a"]`; `q, r = f(..)` and
/// `let (q, r) = f(..)` give `["q", "r"]`; anything else gives `["output"]`.
pub fn infer_output_names(line: &str) -> Vec<String> {
    let fallback = || vec![DEFAULT_OUTPUT.to_string()];
    let line = line.trim();
    if line.is_empty() || line.len() > MAX_SOURCE_LINE {
        return fallback();
    }
    let Some(eq) = find_assignment(line) else {
        return fallback();
    };
    let mut lhs = line[..eq].trim();
    for kw in ["let ", "mut "] {
        if let Some(rest) = lhs.strip_prefix(kw) {
            lhs = rest.trim_start();
        }
    }
    if let Some(colon) = find_type_ascription(lhs) {
        lhs = lhs[..colon].trim();
    }
    let inner = lhs
        .strip_prefix('(')
        .and_then(|s| s.strip_suffix(')'))
        .or_else(|| lhs.strip_prefix('[').and_then(|s| s.strip_suffix(']')))
        .unwrap_or(lhs);
    let targets = split_top_level(inner, ',');
    if targets.is_empty() {
        return fallback();
    }
    let mut names: Vec<String> = Vec::with_capacity(targets.len());
    for (i, target) in targets.iter().enumerate() {
        let target = target
            .trim()
            .trim_start_matches("mut ")
            .trim_start_matches("ref ")
            .trim();
        let name = target.rsplit('.').next().unwrap_or(target).trim();
        let name = if is_ident(name) && !names.iter().any(|n| n == name) {
            name.to_string()
        } else if targets.len() == 1 {
            DEFAULT_OUTPUT.to_string()
        } else {
            format!("{DEFAULT_OUTPUT}{i}")
        };
        names.push(name);
    }
    names
}

/// Byte offset of the first plain `=` outside brackets.
fn find_assignment(line: &str) -> Option<usize> {
    let bytes = line.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth -= 1,
            b'"' | b'\'' => return None,
            b'=' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                let compound = matches!(
                    prev,
                    Some(
                        b'=' | b'!'
                            | b'<'
                            | b'>'
                            | b'+'
                            | b'-'
                            | b'*'
                            | b'/'
                            | b'%'
                            | b'&'
                            | b'|'
                            | b'^'
                    )
                );
                // `=>`, `==`, `<=`, `+=` and friends: not a plain assignment.
                if compound || matches!(next, Some(b'=' | b'>')) {
                    return None;
                }
                return Some(i);
            }
            _ => {}
        }
    }
    None
}

/// Offset of a top-level `:` that is not part of `::`.
fn find_type_ascription(lhs: &str) -> Option<usize> {
    let bytes = lhs.as_bytes();
    let mut depth = 0i32;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'(' | b'[' | b'<' => depth += 1,
            b')' | b']' | b'>' => depth -= 1,
            b':' if depth == 0 => {
                let prev = i.checked_sub(1).map(|p| bytes[p]);
                let next = bytes.get(i + 1).copied();
                if prev != Some(b':') && next != Some(b':') {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parameter and return types of `signature` for the given field names.
///
/// A parameter type applies when its name is an input. The return type applies to a
/// single output; a tuple return is spread over outputs when the arity matches.
pub fn type_hints_from_signature(
    signature: &str,
    inputs: &[String],
    outputs: &[String],
) -> (BTreeMap<String, FieldType>, BTreeMap<String, FieldType>) {
    let mut input_types = BTreeMap::new();
    let mut output_types = BTreeMap::new();
    let Some((params, ret)) = split_signature(signature) else {
        return (input_types, output_types);
    };

    for param in split_top_level(params, ',') {
        let Some(colon) = find_type_ascription(param) else {
            continue;
        };
        let name = param[..colon].trim().trim_start_matches("mut ").trim();
        if inputs.iter().any(|i| i == name) {
            if let Some(ty) = FieldType::from_rust(&param[colon + 1..]) {
                input_types.insert(name.to_string(), ty);
            }
        }
    }

    if let Some(ret) = ret {
        if outputs.len() == 1 {
            if let Some(ty) = FieldType::from_rust(ret) {
                output_types.insert(outputs[0].clone(), ty);
            }
        } else if let Some(parts) = tuple_elements(ret) {
            if parts.len() == outputs.len() {
                for (name, part) in outputs.iter().zip(parts) {
                    if let Some(ty) = FieldType::from_rust(part) {
                        output_types.insert(name.clone(), ty);
                    }
                }
            }
        }
    }
    (input_types, output_types)
}

/// `(params, return type)` of a `fn` signature.
fn split_signature(sig: &str) -> Option<(&str, Option<&str>)> {
    let head = FN_HEAD.as_ref()?.find(sig)?;
    let rest = &sig[head.end()..];
    let bytes = rest.as_bytes();
    let mut angle = 0i32;
    let mut open = None;
    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'<' => angle += 1,
            b'>' => angle -= 1,
            b'(' if angle == 0 => {
                open = Some(i);
                break;
            }
            _ => {}
        }
    }
    let open = open?;
    let mut depth = 0i32;
    let mut close = None;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = close?;
    let params = &rest[open + 1..close];
    let tail = rest[close + 1..].trim();
    let ret = tail.strip_prefix("->").map(|r| {
        let r = r.trim();
        match r.find(" where ") {
            Some(pos) => r[..pos].trim(),
            None => r.trim_end_matches("where").trim(),
        }
    });
    Some((params, ret.filter(|r| !r.is_empty())))
}

fn tuple_elements(ty: &str) -> Option<Vec<&str>> {
    let ty = ty.trim();
    for wrapper in ["Result", "Option"] {
        if let Some(rest) = ty.strip_prefix(wrapper) {
            let inner = rest.trim_start().strip_prefix('<')?.strip_suffix('>')?;
            let first = split_top_level(inner, ',').into_iter().next()?;
            return tuple_elements(first);
        }
    }
    let inner = ty.strip_prefix('(')?.strip_suffix(')')?;
    Some(split_top_level(inner, ','))
}

/// Capture the current call site: `call_site!(a, b)`.
#[macro_export]
macro_rules! call_site {
    ($($arg:expr),* $(,)?) => {
        $crate::inference::CallSite::capture(
            file!(),
            line!(),
            option_env!("CARGO_MANIFEST_DIR"),
            &[$(stringify!($arg)),*],
        )
    };
}

/// Call a [`Caller`](crate::Caller) with positional arguments and the call site attached.
///
/// `invoke!(caller, a, b)` or `invoke!(caller, a, b; options)`. Evaluates to the
/// future returned by [`Caller::call`](crate::Caller::call).
#[macro_export]
macro_rules! invoke {
    ($caller:expr, $($arg:expr),+ ; $opts:expr) => {
        $caller.call(
            $crate::facade::Args::new()$(.arg(&$arg))+,
            ($opts).call_site($crate::call_site!($($arg),+)),
        )
    };
    ($caller:expr, $($arg:expr),+ $(,)?) => {
        $crate::invoke!($caller, $($arg),+ ; $crate::facade::CallOptions::default())
    };
}
