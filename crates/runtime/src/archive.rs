//! XML workspace archive ()SAVE / )LOAD / )COPY / )DUMP)
//!
//! The document is a `Workspace` element carrying metadata, a pool of
//! `<Value>` shape declarations keyed by integer vid (with `parent`
//! attributes restoring nesting), a pool of `<Ravel>` elements whose cells
//! are a mode-prefixed concatenation, the `<SymbolTable>`, and the
//! `<StateIndicator>` rendered textually. Writer and reader are
//! hand-rolled for exactly this dialect.
//!
//! Cell encoding uses a reserved band of code points as mode switches:
//! U0 enters character mode, U1 escapes one character as hex, U2 leaves
//! character mode, U3 ‹digits› is an integer cell, U4 a float, U5 a
//! complex, U6 a pointer to the value with the given vid. U7 (an L-value
//! reference) is recognised but never produced: L-values are statement
//! scoped and never persisted.

use crate::function::UserFunction;
use crate::symbol::Binding;
use crate::workspace::Workspace;
use apl_core::{AplError, Cell, Complex64, ErrorKind, Result, Shape, Value};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// The reserved mode-switch band
pub const U0: char = '\u{E000}';
pub const U1: char = '\u{E001}';
pub const U2: char = '\u{E002}';
pub const U3: char = '\u{E003}';
pub const U4: char = '\u{E004}';
pub const U5: char = '\u{E005}';
pub const U6: char = '\u{E006}';
pub const U7: char = '\u{E007}';

const DTD: &str = r#"<!DOCTYPE Workspace
[
    <!ELEMENT Workspace (Value*,Ravel*,SymbolTable,StateIndicator)>
    <!ATTLIST Workspace  wsid      CDATA #REQUIRED>
    <!ATTLIST Workspace  timestamp CDATA #REQUIRED>
    <!ATTLIST Workspace  timezone  CDATA #REQUIRED>
    <!ATTLIST Workspace  saving    CDATA #REQUIRED>

    <!ELEMENT Value EMPTY>
    <!ATTLIST Value vid    CDATA #REQUIRED>
    <!ATTLIST Value rank   CDATA #REQUIRED>
    <!ATTLIST Value shape  CDATA #REQUIRED>
    <!ATTLIST Value parent CDATA #IMPLIED>

    <!ELEMENT Ravel EMPTY>
    <!ATTLIST Ravel vid   CDATA #REQUIRED>
    <!ATTLIST Ravel cells CDATA #REQUIRED>

    <!ELEMENT SymbolTable (Symbol|Function)*>
    <!ATTLIST SymbolTable size CDATA #REQUIRED>

    <!ELEMENT Symbol EMPTY>
    <!ATTLIST Symbol name CDATA #REQUIRED>
    <!ATTLIST Symbol vid  CDATA #REQUIRED>

    <!ELEMENT Function (Line*)>
    <!ATTLIST Function name CDATA #REQUIRED>

    <!ELEMENT Line EMPTY>
    <!ATTLIST Line text CDATA #REQUIRED>

    <!ELEMENT StateIndicator (SI*)>
    <!ATTLIST StateIndicator levels CDATA #REQUIRED>

    <!ELEMENT SI EMPTY>
    <!ATTLIST SI level CDATA #REQUIRED>
    <!ATTLIST SI text  CDATA #REQUIRED>
]>"#;

// ----------------------------------------------------------------------
// saving
// ----------------------------------------------------------------------

struct ValuePool {
    /// Walk order; each entry is (value, parent vid or None)
    entries: Vec<(Arc<Value>, Option<usize>)>,
    by_ptr: HashMap<*const Value, usize>,
}

impl ValuePool {
    fn new() -> Self {
        ValuePool {
            entries: Vec::new(),
            by_ptr: HashMap::new(),
        }
    }

    /// The reachability walk: marks a value and its nested children.
    /// Sharing is preserved (an already-marked value keeps its vid);
    /// re-visiting under a different parent cannot recurse forever
    /// because completed values are acyclic.
    fn mark(&mut self, v: &Arc<Value>, parent: Option<usize>) -> usize {
        let key = Arc::as_ptr(v);
        if let Some(&vid) = self.by_ptr.get(&key) {
            return vid;
        }
        let vid = self.entries.len();
        self.entries.push((Arc::clone(v), parent));
        self.by_ptr.insert(key, vid);
        for c in v.ravel() {
            if let Cell::Pointer(sub) = c {
                self.mark(sub, Some(vid));
            }
        }
        vid
    }

    fn vid_of(&self, v: &Arc<Value>) -> usize {
        self.by_ptr[&Arc::as_ptr(v)]
    }
}

fn xml_escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

fn encode_cells(v: &Value, pool: &ValuePool) -> String {
    let mut out = String::new();
    let mut in_char = false;
    for c in v.ravel() {
        match c {
            Cell::Char(ch) => {
                if !in_char {
                    out.push(U0);
                    in_char = true;
                }
                let cp = *ch as u32;
                let reserved = (0xE000..=0xE007).contains(&cp);
                if cp < 0x20 || reserved || matches!(*ch, '&' | '<' | '>' | '"') {
                    out.push(U1);
                    let _ = write!(out, "{:04X}", cp);
                } else {
                    out.push(*ch);
                }
            }
            other => {
                if in_char {
                    out.push(U2);
                    in_char = false;
                }
                match other {
                    Cell::Int(n) => {
                        out.push(U3);
                        let _ = write!(out, "{}", n);
                    }
                    Cell::Float(f) => {
                        out.push(U4);
                        let _ = write!(out, "{}", f);
                    }
                    Cell::Complex(z) => {
                        out.push(U5);
                        let _ = write!(out, "{}J{}", z.re, z.im);
                    }
                    Cell::Pointer(sub) => {
                        out.push(U6);
                        let _ = write!(out, "{}", pool.vid_of(sub));
                    }
                    Cell::Char(_) => unreachable!("handled above"),
                }
            }
        }
    }
    out
}

/// Serialise a workspace (plus the textual state indicator) to XML
pub fn save_xml(ws: &Workspace, si: &[String]) -> String {
    // the mark phase: walk every value reachable from the root
    let mut pool = ValuePool::new();
    let mut roots: Vec<(String, usize)> = Vec::new();
    let mut functions: Vec<Arc<UserFunction>> = Vec::new();
    for sym in ws.symbols.iter() {
        match sym.top() {
            Binding::Variable(v) => {
                let vid = pool.mark(v, None);
                roots.push((sym.name.clone(), vid));
            }
            Binding::Function(f) => {
                if !f.is_lambda() {
                    functions.push(Arc::clone(f));
                }
            }
            _ => {}
        }
    }
    tracing::debug!(
        values = pool.entries.len(),
        symbols = roots.len(),
        "workspace save walk"
    );

    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let mut out = String::new();
    out.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    out.push_str(DTD);
    out.push('\n');
    let _ = writeln!(
        out,
        "<Workspace wsid=\"{}\" timestamp=\"{}\" timezone=\"0\" saving=\"apl {}\">",
        xml_escape(&ws.wsid),
        timestamp,
        env!("CARGO_PKG_VERSION"),
    );

    for (vid, (v, parent)) in pool.entries.iter().enumerate() {
        let shape: Vec<String> = v.shape().items().iter().map(|n| n.to_string()).collect();
        let parent_attr = match parent {
            Some(p) => format!(" parent=\"{}\"", p),
            None => String::new(),
        };
        let _ = writeln!(
            out,
            "  <Value vid=\"{}\" rank=\"{}\" shape=\"{}\"{}/>",
            vid,
            v.rank(),
            shape.join(" "),
            parent_attr
        );
    }
    for (vid, (v, _)) in pool.entries.iter().enumerate() {
        let _ = writeln!(
            out,
            "  <Ravel vid=\"{}\" cells=\"{}\"/>",
            vid,
            xml_escape(&encode_cells(v, &pool))
        );
    }

    let _ = writeln!(
        out,
        "  <SymbolTable size=\"{}\">",
        roots.len() + functions.len()
    );
    for (name, vid) in &roots {
        let _ = writeln!(
            out,
            "    <Symbol name=\"{}\" vid=\"{}\"/>",
            xml_escape(name),
            vid
        );
    }
    for f in &functions {
        let _ = writeln!(out, "    <Function name=\"{}\">", xml_escape(f.name()));
        for line in f.canonical_text() {
            let _ = writeln!(out, "      <Line text=\"{}\"/>", xml_escape(line));
        }
        out.push_str("    </Function>\n");
    }
    out.push_str("  </SymbolTable>\n");

    let _ = writeln!(out, "  <StateIndicator levels=\"{}\">", si.len());
    for (level, text) in si.iter().enumerate() {
        let _ = writeln!(
            out,
            "    <SI level=\"{}\" text=\"{}\"/>",
            level,
            xml_escape(text)
        );
    }
    out.push_str("  </StateIndicator>\n");
    out.push_str("</Workspace>\n");
    out
}

pub fn save_file(ws: &Workspace, si: &[String], path: &Path) -> Result<()> {
    let xml = save_xml(ws, si);
    std::fs::write(path, xml)
        .map_err(|e| AplError::with_info(ErrorKind::Domain, e.to_string()))
}

// ----------------------------------------------------------------------
// loading
// ----------------------------------------------------------------------

/// A parsed archive, before installation into a workspace
pub struct LoadedArchive {
    pub wsid: String,
    pub variables: Vec<(String, Value)>,
    pub functions: Vec<(String, Vec<String>)>,
    pub si: Vec<String>,
}

#[derive(Debug, Clone)]
enum CellSpec {
    Char(char),
    Int(i64),
    Float(f64),
    Complex(f64, f64),
    Sub(usize),
}

struct PendingValue {
    shape: Shape,
    parent: Option<usize>,
    cells: Vec<CellSpec>,
}

/// Parse the archive text
pub fn load_xml(text: &str) -> Result<LoadedArchive> {
    let mut parser = XmlScan::new(text);
    let mut wsid = String::new();
    let mut pending: HashMap<usize, PendingValue> = HashMap::new();
    let mut symbols: Vec<(String, usize)> = Vec::new();
    let mut functions: Vec<(String, Vec<String>)> = Vec::new();
    let mut current_function: Option<(String, Vec<String>)> = None;
    let mut si = Vec::new();

    while let Some(el) = parser.next_element()? {
        match el.name.as_str() {
            "Workspace" => {
                wsid = el.attr("wsid").unwrap_or_default();
            }
            "Value" => {
                let vid = el.usize_attr("vid")?;
                let shape_text = el.attr("shape").unwrap_or_default();
                let items: Vec<usize> = shape_text
                    .split_whitespace()
                    .map(|t| t.parse::<usize>().map_err(|_| bad_archive("shape")))
                    .collect::<Result<_>>()?;
                let parent = el.attr("parent").and_then(|p| p.parse::<usize>().ok());
                pending.insert(
                    vid,
                    PendingValue {
                        shape: Shape::new(items).map_err(AplError::new)?,
                        parent,
                        cells: Vec::new(),
                    },
                );
            }
            "Ravel" => {
                let vid = el.usize_attr("vid")?;
                let cells = parse_cells(&el.attr("cells").unwrap_or_default())?;
                pending
                    .get_mut(&vid)
                    .ok_or_else(|| bad_archive("ravel without value"))?
                    .cells = cells;
            }
            "Symbol" => {
                let name = el.attr("name").ok_or_else(|| bad_archive("symbol name"))?;
                let vid = el.usize_attr("vid")?;
                symbols.push((name, vid));
            }
            "Function" => {
                if let Some(f) = current_function.take() {
                    functions.push(f);
                }
                let name = el
                    .attr("name")
                    .ok_or_else(|| bad_archive("function name"))?;
                current_function = Some((name, Vec::new()));
            }
            "Line" => {
                let text = el.attr("text").unwrap_or_default();
                if let Some((_, lines)) = current_function.as_mut() {
                    lines.push(text);
                }
            }
            "SI" => {
                si.push(el.attr("text").unwrap_or_default());
            }
            "/Function" => {
                if let Some(f) = current_function.take() {
                    functions.push(f);
                }
            }
            _ => {}
        }
    }
    if let Some(f) = current_function.take() {
        functions.push(f);
    }

    // build values bottom-up by resolving sub references with a memo;
    // a cycle cannot terminate and is reported loudly
    let mut built: HashMap<usize, Value> = HashMap::new();
    let vids: Vec<usize> = pending.keys().copied().collect();
    for vid in &vids {
        build_value(*vid, &pending, &mut built, 0)?;
    }

    let variables = symbols
        .into_iter()
        .map(|(name, vid)| {
            let v = built
                .get(&vid)
                .cloned()
                .ok_or_else(|| bad_archive("symbol vid"))?;
            Ok((name, v))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(LoadedArchive {
        wsid,
        variables,
        functions,
        si,
    })
}

fn build_value(
    vid: usize,
    pending: &HashMap<usize, PendingValue>,
    built: &mut HashMap<usize, Value>,
    depth: usize,
) -> Result<Value> {
    if let Some(v) = built.get(&vid) {
        return Ok(v.clone());
    }
    if depth > apl_core::MAX_RANK * 1024 {
        // a parent/sub cycle would recurse forever
        return Err(bad_archive("cyclic value nesting"));
    }
    let p = pending.get(&vid).ok_or_else(|| bad_archive("missing vid"))?;
    let mut cells = Vec::with_capacity(p.cells.len());
    for spec in &p.cells {
        cells.push(match spec {
            CellSpec::Char(c) => Cell::Char(*c),
            CellSpec::Int(n) => Cell::Int(*n),
            CellSpec::Float(f) => Cell::Float(*f),
            CellSpec::Complex(re, im) => Cell::Complex(Complex64::new(*re, *im)),
            CellSpec::Sub(sub) => {
                if *sub == vid {
                    return Err(bad_archive("value references itself"));
                }
                Cell::Pointer(Arc::new(build_value(*sub, pending, built, depth + 1)?))
            }
        });
    }
    let v = Value::new(p.shape.clone(), cells).map_err(AplError::new)?;
    built.insert(vid, v.clone());
    Ok(v)
}

fn bad_archive(what: &str) -> AplError {
    AplError::with_info(ErrorKind::Domain, format!("bad archive: {}", what))
}

fn parse_cells(s: &str) -> Result<Vec<CellSpec>> {
    let chars: Vec<char> = s.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    let mut in_char = false;
    while i < chars.len() {
        let c = chars[i];
        match c {
            U0 => {
                in_char = true;
                i += 1;
            }
            U2 => {
                in_char = false;
                i += 1;
            }
            U1 => {
                let hex: String = chars[i + 1..].iter().take(4).collect();
                if hex.len() != 4 {
                    return Err(bad_archive("hex escape"));
                }
                let cp = u32::from_str_radix(&hex, 16).map_err(|_| bad_archive("hex escape"))?;
                out.push(CellSpec::Char(
                    char::from_u32(cp).ok_or_else(|| bad_archive("code point"))?,
                ));
                i += 5;
            }
            U3 => {
                let (text, next) = scan_number(&chars, i + 1);
                out.push(CellSpec::Int(
                    text.parse().map_err(|_| bad_archive("integer cell"))?,
                ));
                i = next;
            }
            U4 => {
                let (text, next) = scan_number(&chars, i + 1);
                out.push(CellSpec::Float(
                    text.parse().map_err(|_| bad_archive("float cell"))?,
                ));
                i = next;
            }
            U5 => {
                let (text, next) = scan_number(&chars, i + 1);
                let (re, im) = text
                    .split_once('J')
                    .ok_or_else(|| bad_archive("complex cell"))?;
                out.push(CellSpec::Complex(
                    re.parse().map_err(|_| bad_archive("complex cell"))?,
                    im.parse().map_err(|_| bad_archive("complex cell"))?,
                ));
                i = next;
            }
            U6 => {
                let (text, next) = scan_number(&chars, i + 1);
                out.push(CellSpec::Sub(
                    text.parse().map_err(|_| bad_archive("vid cell"))?,
                ));
                i = next;
            }
            U7 => {
                // L-values are statement-scoped and never persisted
                return Err(bad_archive("L-value cell in archive"));
            }
            _ if in_char => {
                out.push(CellSpec::Char(c));
                i += 1;
            }
            _ => return Err(bad_archive("cell prefix")),
        }
    }
    Ok(out)
}

/// Scan the run of a numeric payload (digits, sign, dot, exponent, J)
fn scan_number(chars: &[char], from: usize) -> (String, usize) {
    let mut i = from;
    let mut out = String::new();
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit()
            || matches!(c, '-' | '+' | '.' | 'e' | 'E' | 'J' | 'i' | 'n' | 'f' | 'N' | 'a')
        {
            out.push(c);
            i += 1;
        } else {
            break;
        }
    }
    (out, i)
}

/// Install a loaded archive into a workspace ()LOAD)
pub fn install(ws: &mut Workspace, archive: LoadedArchive) -> Result<()> {
    ws.wsid = archive.wsid.clone();
    for (name, v) in archive.variables {
        ws.symbols.assign(&name, v);
    }
    for (name, lines) in archive.functions {
        let fun = UserFunction::fix(&lines)?;
        ws.symbols.assign_function(&name, Arc::new(fun));
    }
    Ok(())
}

/// )COPY / )PCOPY: merge names from an archive; `protect` keeps existing
/// bindings
pub fn copy_names(
    ws: &mut Workspace,
    archive: LoadedArchive,
    names: Option<&[&str]>,
    protect: bool,
) -> Result<Vec<String>> {
    let wanted = |name: &str| match names {
        Some(list) => list.contains(&name),
        None => true,
    };
    let mut copied = Vec::new();
    for (name, v) in archive.variables {
        if !wanted(&name) {
            continue;
        }
        if protect && ws.symbols.lookup(&name).is_some_and(|s| s.name_class() != 0) {
            continue;
        }
        ws.symbols.assign(&name, v);
        copied.push(name);
    }
    for (name, lines) in archive.functions {
        if !wanted(&name) {
            continue;
        }
        if protect && ws.symbols.lookup(&name).is_some_and(|s| s.name_class() != 0) {
            continue;
        }
        let fun = UserFunction::fix(&lines)?;
        ws.symbols.assign_function(&name, Arc::new(fun));
        copied.push(name);
    }
    Ok(copied)
}

pub fn load_file(path: &Path) -> Result<LoadedArchive> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AplError::with_info(ErrorKind::Domain, e.to_string()))?;
    load_xml(&text)
}

// ----------------------------------------------------------------------
// )DUMP: a re-executable text image
// ----------------------------------------------------------------------

/// Lines that, evaluated in a clear workspace, reproduce this one.
/// State-indicator entries are preserved textually as comments.
pub fn dump_lines(ws: &Workspace, si: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for sym in ws.symbols.iter() {
        match sym.top() {
            Binding::Variable(v) => {
                if let Some(expr) = value_expression(v) {
                    out.push(format!("{}←{}", sym.name, expr));
                }
            }
            Binding::Function(f) => {
                if f.is_lambda() {
                    continue;
                }
                let quoted: Vec<String> = f
                    .canonical_text()
                    .iter()
                    .map(|l| format!("'{}'", l.replace('\'', "''")))
                    .collect();
                out.push(format!("⎕FX {}", quoted.join(" ")));
            }
            _ => {}
        }
    }
    for text in si {
        out.push(format!("⍝ SI: {}", text));
    }
    out.sort();
    out
}

/// )OUT: write the re-executable text image to a transfer file
pub fn out_file(ws: &Workspace, si: &[String], path: &Path) -> Result<()> {
    let text = dump_lines(ws, si).join("\n");
    std::fs::write(path, text)
        .map_err(|e| AplError::with_info(ErrorKind::Domain, e.to_string()))
}

/// )IN: the lines of a transfer file, for the session to evaluate
pub fn in_file(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| AplError::with_info(ErrorKind::Domain, e.to_string()))?;
    Ok(text.lines().map(str::to_string).collect())
}

/// An executable expression reproducing a value, where one exists
fn value_expression(v: &Value) -> Option<String> {
    if v.is_char_array() && v.rank() <= 1 {
        let s = v.as_string().ok()?;
        return Some(format!("'{}'", s.replace('\'', "''")));
    }
    if !v.is_simple() {
        // nested values are reproduced element-wise through catenation
        let parts: Vec<String> = v
            .ravel()
            .iter()
            .take(v.element_count())
            .map(|c| match c {
                Cell::Pointer(sub) => value_expression(sub).map(|e| format!("(⊂{})", e)),
                other => cell_expression(other),
            })
            .collect::<Option<Vec<_>>>()?;
        return Some(parts.join(","));
    }
    let ravel: Vec<String> = v
        .ravel()
        .iter()
        .take(v.element_count())
        .map(cell_expression)
        .collect::<Option<Vec<_>>>()?;
    if v.rank() <= 1 && v.element_count() > 0 {
        return Some(ravel.join(" "));
    }
    let shape: Vec<String> = v.shape().items().iter().map(|n| n.to_string()).collect();
    let body = if ravel.is_empty() {
        "0".to_string()
    } else {
        ravel.join(" ")
    };
    Some(format!("{}⍴{}", shape.join(" "), body))
}

fn cell_expression(c: &Cell) -> Option<String> {
    match c {
        Cell::Int(n) => Some(if *n < 0 {
            format!("¯{}", n.unsigned_abs())
        } else {
            n.to_string()
        }),
        Cell::Float(f) => {
            let s = format!("{}", f);
            Some(s.replace('-', "¯"))
        }
        Cell::Complex(z) => Some(format!(
            "{}J{}",
            format!("{}", z.re).replace('-', "¯"),
            format!("{}", z.im).replace('-', "¯")
        )),
        Cell::Char(ch) => Some(format!("'{}'", ch)),
        Cell::Pointer(_) => None,
    }
}

// ----------------------------------------------------------------------
// a minimal scanner for our own XML dialect
// ----------------------------------------------------------------------

struct XmlElement {
    name: String,
    attrs: Vec<(String, String)>,
}

impl XmlElement {
    fn attr(&self, name: &str) -> Option<String> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| xml_unescape(v))
    }

    fn usize_attr(&self, name: &str) -> Result<usize> {
        self.attr(name)
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| bad_archive(name))
    }
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

struct XmlScan<'a> {
    text: &'a str,
    pos: usize,
}

impl<'a> XmlScan<'a> {
    fn new(text: &'a str) -> Self {
        XmlScan { text, pos: 0 }
    }

    fn next_element(&mut self) -> Result<Option<XmlElement>> {
        loop {
            let rest = &self.text[self.pos..];
            let Some(open) = rest.find('<') else {
                return Ok(None);
            };
            let start = self.pos + open + 1;
            let tail = &self.text[start..];
            // skip declarations, the DTD and comments
            if tail.starts_with('?') || tail.starts_with('!') {
                let close = tail
                    .find('>')
                    .ok_or_else(|| bad_archive("unterminated markup"))?;
                // the embedded DTD contains nested '>'s; skip to "]>"
                if tail.starts_with("!DOCTYPE") {
                    let end = tail
                        .find("]>")
                        .ok_or_else(|| bad_archive("unterminated DTD"))?;
                    self.pos = start + end + 2;
                } else {
                    self.pos = start + close + 1;
                }
                continue;
            }
            let close = tail
                .find('>')
                .ok_or_else(|| bad_archive("unterminated element"))?;
            let body = tail[..close].trim_end_matches('/').trim();
            self.pos = start + close + 1;
            let mut parts = body.splitn(2, char::is_whitespace);
            let name = parts.next().unwrap_or_default().to_string();
            let mut attrs = Vec::new();
            if let Some(attr_text) = parts.next() {
                attrs = parse_attrs(attr_text)?;
            }
            return Ok(Some(XmlElement { name, attrs }));
        }
    }
}

fn parse_attrs(s: &str) -> Result<Vec<(String, String)>> {
    let mut out = Vec::new();
    let chars: Vec<char> = s.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }
        let key_start = i;
        while i < chars.len() && chars[i] != '=' && !chars[i].is_whitespace() {
            i += 1;
        }
        let key: String = chars[key_start..i].iter().collect();
        while i < chars.len() && (chars[i] == '=' || chars[i].is_whitespace()) {
            i += 1;
        }
        if i >= chars.len() || chars[i] != '"' {
            return Err(bad_archive("attribute quoting"));
        }
        i += 1;
        let val_start = i;
        while i < chars.len() && chars[i] != '"' {
            i += 1;
        }
        let val: String = chars[val_start..i].iter().collect();
        i += 1;
        out.push((key, val));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws_with_values() -> Workspace {
        let mut ws = Workspace::new();
        ws.wsid = "TESTWS".to_string();
        ws.symbols.assign("N", Value::int_vector(&[1, 2, 3]));
        ws.symbols.assign("S", Value::char_vector("hi <&> 'q'"));
        let inner = Value::int_vector(&[7, 8]);
        ws.symbols.assign(
            "NEST",
            Value::vector(vec![
                Cell::Pointer(Arc::new(inner)),
                Cell::Int(9),
                Cell::Float(2.5),
            ]),
        );
        ws
    }

    #[test]
    fn test_save_load_round_trip() {
        let ws = ws_with_values();
        let xml = save_xml(&ws, &[]);
        let loaded = load_xml(&xml).unwrap();
        assert_eq!(loaded.wsid, "TESTWS");

        let mut ws2 = Workspace::new();
        install(&mut ws2, loaded).unwrap();
        for name in ["N", "S", "NEST"] {
            let a = ws.symbols.value_of(name).unwrap();
            let b = ws2.symbols.value_of(name).unwrap();
            assert!(
                Value::tolerantly_equal(&a, &b, 0.0),
                "{} differs after round trip",
                name
            );
        }
    }

    #[test]
    fn test_nested_structure_preserved() {
        let ws = ws_with_values();
        let xml = save_xml(&ws, &[]);
        // the nested child appears as its own pooled value with a parent
        assert!(xml.contains("parent=\""));
        let loaded = load_xml(&xml).unwrap();
        let nest = loaded
            .variables
            .iter()
            .find(|(n, _)| n == "NEST")
            .map(|(_, v)| v)
            .unwrap();
        assert!(matches!(nest.ravel()[0], Cell::Pointer(_)));
    }

    #[test]
    fn test_function_round_trip() {
        let mut ws = Workspace::new();
        let f = UserFunction::fix(&[
            "Z←A PLUS B".to_string(),
            "Z←A+B".to_string(),
        ])
        .unwrap();
        ws.symbols.assign_function("PLUS", Arc::new(f));
        let xml = save_xml(&ws, &[]);
        let loaded = load_xml(&xml).unwrap();
        assert_eq!(loaded.functions.len(), 1);
        assert_eq!(loaded.functions[0].0, "PLUS");
        assert_eq!(loaded.functions[0].1[1], "Z←A+B");
    }

    #[test]
    fn test_si_preserved_textually() {
        let ws = Workspace::new();
        let xml = save_xml(&ws, &["FOO[2] ⍫".to_string(), "⋆".to_string()]);
        let loaded = load_xml(&xml).unwrap();
        assert_eq!(loaded.si, vec!["FOO[2] ⍫", "⋆"]);
    }

    #[test]
    fn test_u7_rejected() {
        let cells = format!("{}3[0]", U7);
        assert!(parse_cells(&cells).is_err());
    }

    #[test]
    fn test_copy_protect() {
        let ws = ws_with_values();
        let xml = save_xml(&ws, &[]);

        let mut target = Workspace::new();
        target.symbols.assign("N", Value::int_scalar(99));
        let loaded = load_xml(&xml).unwrap();
        let copied = copy_names(&mut target, loaded, Some(&["N", "S"]), true).unwrap();
        // N was protected, S was copied
        assert_eq!(copied, vec!["S".to_string()]);
        assert_eq!(
            target.symbols.value_of("N").unwrap().ravel()[0],
            Cell::Int(99)
        );
    }

    #[test]
    fn test_dump_is_reexecutable_text() {
        let ws = ws_with_values();
        let lines = dump_lines(&ws, &["F[1]".to_string()]);
        assert!(lines.iter().any(|l| l.starts_with("N←1 2 3")));
        assert!(lines.iter().any(|l| l.starts_with("S←'")));
        assert!(lines.iter().any(|l| l.contains("⍝ SI: F[1]")));
    }

    #[test]
    fn test_shared_value_keeps_one_vid() {
        let mut ws = Workspace::new();
        let shared = Arc::new(Value::int_vector(&[1, 2]));
        ws.symbols.assign(
            "A",
            Value::vector(vec![
                Cell::Pointer(Arc::clone(&shared)),
                Cell::Pointer(Arc::clone(&shared)),
            ]),
        );
        let xml = save_xml(&ws, &[]);
        let loaded = load_xml(&xml).unwrap();
        let a = &loaded.variables[0].1;
        assert_eq!(a.element_count(), 2);
        match (&a.ravel()[0], &a.ravel()[1]) {
            (Cell::Pointer(x), Cell::Pointer(y)) => {
                assert!(Value::tolerantly_equal(x, y, 0.0))
            }
            _ => panic!("expected pointers"),
        }
    }
}
