//! Script Tokenizer
//!
//! A small JavaScript-shaped lexer used wherever component scripts are scanned:
//! prop/reactive-variable inference, forbidden-call detection and splitting a
//! script into initializer statements and methods. String, template, comment and
//! regex-literal boundaries are tracked so braces inside literal content never
//! affect depth.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Ident,
    Number,
    Str,
    Template,
    Regex,
    LineComment,
    BlockComment,
    Punct,
    Newline,
    Whitespace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// Byte offset into the scanned source
    pub start: usize,
}

impl<'a> Token<'a> {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Whitespace, newlines and comments.
    pub fn is_trivia(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Whitespace
                | TokenKind::Newline
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }

    pub fn is_punct(&self, p: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == p
    }

    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }

    /// String-like content that must be hidden from textual scans.
    pub fn is_literal_content(&self) -> bool {
        matches!(
            self.kind,
            TokenKind::Str
                | TokenKind::Template
                | TokenKind::Regex
                | TokenKind::LineComment
                | TokenKind::BlockComment
        )
    }
}

/// Longest first, so the first prefix match wins.
const PUNCTUATORS: &[&str] = &[
    ">>>=", "...", "===", "!==", "**=", "<<=", ">>=", ">>>", "&&=", "||=", "??=", "=>", "==",
    "!=", "<=", ">=", "&&", "||", "??", "?.", "++", "--", "+=", "-=", "*=", "/=", "%=", "&=",
    "|=", "^=", "**", "<<", ">>",
];

/// Keywords after which a `/` starts a regex literal rather than a division.
const REGEX_PRECEDING_KEYWORDS: &[&str] = &[
    "return",
    "typeof",
    "case",
    "do",
    "else",
    "in",
    "instanceof",
    "new",
    "void",
    "delete",
    "throw",
    "yield",
    "await",
];

/// Identifiers that can precede `(` without being a method header.
const CONTROL_KEYWORDS: &[&str] = &[
    "if", "for", "while", "switch", "catch", "with", "return", "typeof", "new", "function",
    "class", "const", "let", "var", "do", "else", "await", "yield", "delete", "void", "throw",
];

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENIZER
// ═══════════════════════════════════════════════════════════════════════════════

pub fn tokenize(src: &str) -> Vec<Token<'_>> {
    let bytes = src.as_bytes();
    let len = bytes.len();
    let mut tokens: Vec<Token<'_>> = Vec::new();
    let mut pos = 0;

    while pos < len {
        let b = bytes[pos];
        let next = bytes.get(pos + 1).copied();

        let (kind, end) = match b {
            b'\n' => (TokenKind::Newline, pos + 1),
            b'\r' => {
                let end = if next == Some(b'\n') { pos + 2 } else { pos + 1 };
                (TokenKind::Newline, end)
            }
            b' ' | b'\t' | 0x0b | 0x0c => {
                let mut end = pos;
                while end < len && matches!(bytes[end], b' ' | b'\t' | 0x0b | 0x0c) {
                    end += 1;
                }
                (TokenKind::Whitespace, end)
            }
            b'"' | b'\'' => (TokenKind::Str, scan_quoted(bytes, pos)),
            b'`' => (TokenKind::Template, scan_template(bytes, pos)),
            b'/' if next == Some(b'/') => (TokenKind::LineComment, scan_line_end(bytes, pos)),
            b'/' if next == Some(b'*') => (TokenKind::BlockComment, scan_block_comment(bytes, pos)),
            b'/' if regex_allowed(&tokens) => match scan_regex(bytes, pos) {
                Some(end) => (TokenKind::Regex, end),
                None => (TokenKind::Punct, scan_punct(src, pos)),
            },
            b'0'..=b'9' => (TokenKind::Number, scan_number(bytes, pos)),
            b'.' if next.map_or(false, |n| n.is_ascii_digit()) => {
                (TokenKind::Number, scan_number(bytes, pos))
            }
            _ if is_ident_byte(b) && !b.is_ascii_digit() => {
                let mut end = pos;
                while end < len && is_ident_byte(bytes[end]) {
                    end += 1;
                }
                (TokenKind::Ident, end)
            }
            _ => (TokenKind::Punct, scan_punct(src, pos)),
        };

        let end = end.min(len);
        tokens.push(Token {
            kind,
            text: &src[pos..end],
            start: pos,
        });
        pos = end;
    }

    tokens
}

/// Non-ASCII bytes are treated as identifier content so multi-byte characters
/// never get split across tokens.
fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn scan_quoted(bytes: &[u8], pos: usize) -> usize {
    let quote = bytes[pos];
    let mut i = pos + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' => return i,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    bytes.len()
}

fn scan_template(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'`' => return i + 1,
            b'$' if bytes.get(i + 1) == Some(&b'{') => i = scan_braced(bytes, i + 2),
            _ => i += 1,
        }
    }
    bytes.len()
}

/// Scan a `${ ... }` substitution body, returning the offset after its `}`.
fn scan_braced(bytes: &[u8], mut i: usize) -> usize {
    let mut depth = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' | b'\'' => i = scan_quoted(bytes, i),
            b'`' => i = scan_template(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'/') => i = scan_line_end(bytes, i),
            b'/' if bytes.get(i + 1) == Some(&b'*') => i = scan_block_comment(bytes, i),
            b'{' => {
                depth += 1;
                i += 1;
            }
            b'}' => {
                depth -= 1;
                i += 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

fn scan_line_end(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos;
    while i < bytes.len() && bytes[i] != b'\n' && bytes[i] != b'\r' {
        i += 1;
    }
    i
}

fn scan_block_comment(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos + 2;
    while i + 1 < bytes.len() {
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            return i + 2;
        }
        i += 1;
    }
    bytes.len()
}

/// Returns `None` when the literal is unterminated on its line, in which case
/// the slash is re-read as an operator.
fn scan_regex(bytes: &[u8], pos: usize) -> Option<usize> {
    let mut i = pos + 1;
    let mut in_class = false;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'\n' | b'\r' => return None,
            b'[' => {
                in_class = true;
                i += 1;
            }
            b']' => {
                in_class = false;
                i += 1;
            }
            b'/' if !in_class => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                return Some(i);
            }
            _ => i += 1,
        }
    }
    None
}

fn scan_number(bytes: &[u8], pos: usize) -> usize {
    let mut i = pos;
    while i < bytes.len() {
        let b = bytes[i];
        let exponent_sign = (b == b'+' || b == b'-')
            && i > pos
            && matches!(bytes[i - 1], b'e' | b'E')
            && !bytes[pos..i].starts_with(b"0x");
        if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' || exponent_sign {
            i += 1;
        } else {
            break;
        }
    }
    i
}

fn scan_punct(src: &str, pos: usize) -> usize {
    let rest = &src[pos..];
    PUNCTUATORS
        .iter()
        .find(|p| rest.starts_with(**p))
        .map(|p| pos + p.len())
        .unwrap_or(pos + 1)
}

fn regex_allowed(tokens: &[Token<'_>]) -> bool {
    match tokens.iter().rev().find(|t| !t.is_trivia()) {
        None => true,
        Some(t) => match t.kind {
            TokenKind::Punct => !matches!(t.text, ")" | "]" | "}"),
            TokenKind::Ident => REGEX_PRECEDING_KEYWORDS.contains(&t.text),
            _ => false,
        },
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SOURCE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Blank out string, template, regex and comment content while preserving byte
/// offsets and line structure, so regex scans only ever see code.
pub fn mask_literals(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    for token in tokenize(src) {
        if token.is_literal_content() {
            for c in token.text.chars() {
                if c == '\n' || c == '\r' {
                    out.push(c);
                } else {
                    out.extend(std::iter::repeat(' ').take(c.len_utf8()));
                }
            }
        } else {
            out.push_str(token.text);
        }
    }
    out
}

/// 1-based line and column of a byte offset.
pub fn line_col(src: &str, offset: usize) -> (u32, u32) {
    let offset = offset.min(src.len());
    let before = &src.as_bytes()[..offset];
    let line = before.iter().filter(|b| **b == b'\n').count() as u32 + 1;
    let line_start = before
        .iter()
        .rposition(|b| *b == b'\n')
        .map(|p| p + 1)
        .unwrap_or(0);
    (line, (offset - line_start) as u32 + 1)
}

pub fn is_keyword(word: &str) -> bool {
    CONTROL_KEYWORDS.contains(&word) || REGEX_PRECEDING_KEYWORDS.contains(&word)
}

/// The expression at the start of `src`, up to a top-level `;` or the end of
/// its logical line. Used for prop default values.
pub fn expression_extent(src: &str) -> &str {
    let tokens = tokenize(src);
    let Some(start) = next_significant(&tokens, 0) else {
        return "";
    };
    let end = statement_end(&tokens, start);
    match last_significant(&tokens, start, end) {
        Some(last) => {
            let last = if tokens[last].is_punct(";") {
                match last_significant(&tokens, start, last) {
                    Some(l) => l,
                    None => return "",
                }
            } else {
                last
            };
            &src[tokens[start].start..tokens[last].end()]
        }
        None => "",
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATEMENT SCANNING
// ═══════════════════════════════════════════════════════════════════════════════

fn next_significant(tokens: &[Token<'_>], from: usize) -> Option<usize> {
    (from..tokens.len()).find(|&i| !tokens[i].is_trivia())
}

fn last_significant(tokens: &[Token<'_>], start: usize, end: usize) -> Option<usize> {
    (start..end).rev().find(|&i| !tokens[i].is_trivia())
}

/// A line ending after this token does not end the statement.
fn continues_after(tok: &Token<'_>) -> bool {
    match tok.kind {
        TokenKind::Punct => !matches!(tok.text, ")" | "]" | "}" | "++" | "--" | ";"),
        TokenKind::Ident => tok.text == "else",
        _ => false,
    }
}

/// A line starting with this token continues the previous statement.
fn continues_before(tok: &Token<'_>) -> bool {
    match tok.kind {
        TokenKind::Punct => !matches!(
            tok.text,
            "(" | "[" | "{" | "!" | "~" | "++" | "--" | ";" | "}" | ")" | "]"
        ),
        TokenKind::Ident => matches!(tok.text, "else" | "catch" | "finally"),
        _ => false,
    }
}

/// Token index one past the end of the statement starting at `start`.
/// A closer with no matching opener ends the statement before it.
fn statement_end(tokens: &[Token<'_>], start: usize) -> usize {
    let mut depth: i32 = 0;
    let mut last_sig: Option<&Token<'_>> = None;
    let mut i = start;

    while i < tokens.len() {
        let tok = &tokens[i];
        match tok.kind {
            TokenKind::Punct => match tok.text {
                "(" | "[" | "{" => depth += 1,
                ")" | "]" | "}" => {
                    depth -= 1;
                    if depth < 0 {
                        return i;
                    }
                }
                ";" if depth == 0 => return i + 1,
                _ => {}
            },
            TokenKind::Newline if depth == 0 => {
                if let Some(prev) = last_sig {
                    if !continues_after(prev) {
                        match next_significant(tokens, i + 1) {
                            Some(n) if continues_before(&tokens[n]) => {}
                            _ => return i,
                        }
                    }
                }
            }
            _ => {}
        }
        if !tok.is_trivia() {
            last_sig = Some(tok);
        }
        i += 1;
    }

    tokens.len()
}

fn matching_close(tokens: &[Token<'_>], open: usize, open_p: &str, close_p: &str) -> Option<usize> {
    let mut depth = 0;
    for (i, tok) in tokens.iter().enumerate().skip(open) {
        if tok.is_punct(open_p) {
            depth += 1;
        } else if tok.is_punct(close_p) {
            depth -= 1;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

struct MethodHeader {
    name: usize,
    params_open: usize,
    params_close: usize,
    body_open: usize,
}

/// `function name(...) {`, `async name(...) {` or shorthand `name(...) {`.
fn method_header(tokens: &[Token<'_>], start: usize) -> Option<MethodHeader> {
    let mut i = start;
    if tokens[i].is_ident("async") {
        i = next_significant(tokens, i + 1)?;
    }
    let declared = tokens[i].is_ident("function");
    if declared {
        i = next_significant(tokens, i + 1)?;
    }

    let name_tok = &tokens[i];
    if name_tok.kind != TokenKind::Ident {
        return None;
    }
    if !declared && CONTROL_KEYWORDS.contains(&name_tok.text) {
        return None;
    }

    let params_open = next_significant(tokens, i + 1)?;
    if !tokens[params_open].is_punct("(") {
        return None;
    }
    let params_close = matching_close(tokens, params_open, "(", ")")?;
    let body_open = next_significant(tokens, params_close + 1)?;
    if !tokens[body_open].is_punct("{") {
        return None;
    }

    Some(MethodHeader {
        name: i,
        params_open,
        params_close,
        body_open,
    })
}

fn split_params(tokens: &[Token<'_>], src: &str, open: usize, close: usize) -> Vec<String> {
    let mut params = Vec::new();
    let mut depth = 0;
    let mut seg_start = tokens[open].end();

    for tok in &tokens[open + 1..close] {
        match tok.kind {
            TokenKind::Punct if matches!(tok.text, "(" | "[" | "{") => depth += 1,
            TokenKind::Punct if matches!(tok.text, ")" | "]" | "}") => depth -= 1,
            TokenKind::Punct if tok.text == "," && depth == 0 => {
                params.push(src[seg_start..tok.start].trim().to_string());
                seg_start = tok.end();
            }
            _ => {}
        }
    }
    let last = src[seg_start..tokens[close].start].trim();
    if !last.is_empty() {
        params.push(last.to_string());
    }
    params
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct MethodSource {
    pub name: String,
    /// Raw parameter sources, defaults included (`b = 2`)
    pub params: Vec<String>,
    pub body: String,
    /// Full header-through-closing-brace text
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Partition {
    /// Top-level statements in declaration order, without trailing `;`
    pub init: Vec<String>,
    pub methods: Vec<MethodSource>,
}

fn is_prop_declaration(tokens: &[Token<'_>], start: usize) -> bool {
    tokens[start].is_ident("export")
        && next_significant(tokens, start + 1).map_or(false, |n| tokens[n].is_ident("let"))
}

/// Split a component script into initializer statements and methods.
/// `export let` prop declarations are dropped; they are handled as props.
pub fn partition_script(script: &str) -> Partition {
    let tokens = tokenize(script);
    let mut partition = Partition::default();
    let mut i = 0;

    while let Some(start) = next_significant(&tokens, i) {
        if is_prop_declaration(&tokens, start) {
            i = statement_end(&tokens, start).max(start + 1);
            continue;
        }

        if let Some(header) = method_header(&tokens, start) {
            let close = matching_close(&tokens, header.body_open, "{", "}");
            let body_end = close.map_or(script.len(), |c| tokens[c].start);
            let source_end = close.map_or(script.len(), |c| tokens[c].end());

            partition.methods.push(MethodSource {
                name: tokens[header.name].text.to_string(),
                params: split_params(&tokens, script, header.params_open, header.params_close),
                body: script[tokens[header.body_open].end()..body_end].to_string(),
                source: script[tokens[start].start..source_end].to_string(),
            });
            i = close.map_or(tokens.len(), |c| c + 1);
            continue;
        }

        let end = statement_end(&tokens, start);
        if end <= start {
            // Stray closer
            i = start + 1;
            continue;
        }

        if let Some(mut last) = last_significant(&tokens, start, end) {
            if tokens[last].is_punct(";") {
                last = match last_significant(&tokens, start, last) {
                    Some(l) => l,
                    None => {
                        i = end;
                        continue;
                    }
                };
            }
            let text = script[tokens[start].start..tokens[last].end()].trim();
            if !text.is_empty() {
                partition.init.push(text.to_string());
            }
        }
        i = end;
    }

    partition
}

/// Split a statement block (method body) into top-level statements.
pub fn split_statements(body: &str) -> Vec<String> {
    let tokens = tokenize(body);
    let mut statements = Vec::new();
    let mut i = 0;

    while let Some(start) = next_significant(&tokens, i) {
        let end = statement_end(&tokens, start);
        if end <= start {
            i = start + 1;
            continue;
        }
        if let Some(last) = last_significant(&tokens, start, end) {
            let mut text = body[tokens[start].start..tokens[last].end()].trim();
            if let Some(stripped) = text.strip_suffix(';') {
                text = stripped.trim_end();
            }
            if !text.is_empty() {
                statements.push(text.to_string());
            }
        }
        i = end;
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        tokenize(src)
            .into_iter()
            .filter(|t| !t.is_trivia())
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn test_tokenize_basic() {
        assert_eq!(
            kinds("this.count += 1;"),
            vec![
                TokenKind::Ident,
                TokenKind::Punct,
                TokenKind::Ident,
                TokenKind::Punct,
                TokenKind::Number,
                TokenKind::Punct
            ]
        );
    }

    #[test]
    fn test_regex_vs_division() {
        let toks: Vec<_> = tokenize("const r = /a{2}/g; const d = a / b / c;")
            .into_iter()
            .filter(|t| !t.is_trivia())
            .collect();
        assert_eq!(toks[3].kind, TokenKind::Regex);
        assert_eq!(toks[3].text, "/a{2}/g");
        assert!(toks.iter().filter(|t| t.is_punct("/")).count() == 2);
    }

    #[test]
    fn test_template_with_nested_substitution() {
        let toks = tokenize("`a ${ {x: `b ${c}`}.x } d` + 1");
        assert_eq!(toks[0].kind, TokenKind::Template);
        assert_eq!(toks[0].text, "`a ${ {x: `b ${c}`}.x } d`");
    }

    #[test]
    fn test_mask_literals_preserves_offsets() {
        let src = "a = 'createHooks(' // createState(\nb = 1";
        let masked = mask_literals(src);
        assert_eq!(masked.len(), src.len());
        assert!(!masked.contains("createHooks"));
        assert!(!masked.contains("createState"));
        assert!(masked.contains("\nb = 1"));
    }

    #[test]
    fn test_line_col() {
        let src = "ab\ncd\nef";
        assert_eq!(line_col(src, 0), (1, 1));
        assert_eq!(line_col(src, 4), (2, 2));
        assert_eq!(line_col(src, 6), (3, 1));
    }

    #[test]
    fn test_expression_extent() {
        assert_eq!(expression_extent(" 'hi'; rest"), "'hi'");
        assert_eq!(expression_extent(" { a: 1,\n b: 2 }\nnext"), "{ a: 1,\n b: 2 }");
        assert_eq!(expression_extent(" 1 +\n 2\nnext"), "1 +\n 2");
        assert_eq!(expression_extent("   "), "");
    }

    #[test]
    fn test_partition_methods_and_init() {
        let script = r#"
            export let title = "Hello";
            this.count = 0;
            this.label = '}'

            increment() {
                this.count = this.count + 1;
                if (this.count > 10) { this.count = 0; }
            }

            function reset() { this.count = 0; }
        "#;

        let partition = partition_script(script);
        assert_eq!(partition.init, vec!["this.count = 0", "this.label = '}'"]);
        assert_eq!(partition.methods.len(), 2);
        assert_eq!(partition.methods[0].name, "increment");
        assert!(partition.methods[0].body.contains("if (this.count > 10)"));
        assert_eq!(partition.methods[1].name, "reset");
        assert_eq!(partition.methods[1].body.trim(), "this.count = 0;");
    }

    #[test]
    fn test_partition_ignores_braces_in_literals() {
        let script = "greet(name) {\n  const s = \"{{{\";\n  // }}}\n  return `${name} }`;\n}\nthis.x = 1";
        let partition = partition_script(script);
        assert_eq!(partition.methods.len(), 1);
        assert_eq!(partition.methods[0].params, vec!["name"]);
        assert_eq!(partition.init, vec!["this.x = 1"]);
    }

    #[test]
    fn test_partition_does_not_treat_control_flow_as_method() {
        let script = "if (ready) {\n  this.x = 1\n}\nelse {\n  this.x = 2\n}";
        let partition = partition_script(script);
        assert!(partition.methods.is_empty());
        assert_eq!(partition.init.len(), 1);
        assert!(partition.init[0].starts_with("if (ready)"));
        assert!(partition.init[0].ends_with('}'));
    }

    #[test]
    fn test_split_statements() {
        let stmts = split_statements("\n  const a = 1;\n  this.total = a +\n    2\n  return a\n");
        assert_eq!(stmts, vec!["const a = 1", "this.total = a +\n    2", "return a"]);
    }
}
