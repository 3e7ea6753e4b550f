//! Markdown articles
//!
//! Articles that look like markdown are flattened to the plain text a
//! reader would see before segmentation. Block structure becomes blank-line
//! separated paragraphs (list items and soft line breaks become single
//! newlines). Emphasis, code spans and links survive as char ranges over
//! the flattened text so the render pass can wrap them in inline nodes.
//!
//! Parsing uses the tree-sitter markdown grammars: the block grammar for
//! structure, then the inline grammar over each block's text.

use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};
use std::cmp::Reverse;
use std::ops::Range;
use tree_sitter::{Node, Parser};

use crate::error::{MarginaliaError, Result};

static MARKDOWN_HINTS: Lazy<RegexSet> = Lazy::new(|| {
    RegexSet::new([
        r"(?m)^#{1,6}\s",
        r"\*\*.*\*\*",
        r"\*.*\*",
        r"\[.*\]\(.*\)",
        r"```[\s\S]*```",
        r"(?m)^[-*+]\s",
        r"(?m)^\d+\.\s",
        r"(?m)^>\s",
        r"!\[.*\]\(.*\)",
    ])
    .expect("Valid markdown hint patterns")
});

static QUOTE_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]*(?:>[ \t]?)+").expect("Valid quote prefix regex"));

/// Whether `text` carries markdown syntax worth rendering
pub fn is_markdown(text: &str) -> bool {
    MARKDOWN_HINTS.is_match(text)
}

/// Inline element over the flattened text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineSpan {
    /// Element name: `em`, `strong`, `code`, `a` or `del`
    pub tag: &'static str,
    /// Char range into [`Flattened::text`]
    pub span: Range<usize>,
}

/// Markdown reduced to reader-visible text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flattened {
    pub text: String,
    /// Sorted by start, enclosing spans before the spans they contain
    pub inlines: Vec<InlineSpan>,
}

/// Flatten markdown with a fresh pair of parsers
pub fn flatten(source: &str) -> Result<Flattened> {
    MarkdownFlattener::new()?.flatten(source)
}

pub struct MarkdownFlattener {
    block: Parser,
    inline: Parser,
}

impl MarkdownFlattener {
    pub fn new() -> Result<Self> {
        let mut block = Parser::new();
        block
            .set_language(&tree_sitter_md::LANGUAGE.into())
            .map_err(|e| MarginaliaError::Markdown(format!("block grammar: {}", e)))?;
        let mut inline = Parser::new();
        inline
            .set_language(&tree_sitter_md::INLINE_LANGUAGE.into())
            .map_err(|e| MarginaliaError::Markdown(format!("inline grammar: {}", e)))?;
        Ok(Self { block, inline })
    }

    pub fn flatten(&mut self, source: &str) -> Result<Flattened> {
        let tree = self
            .block
            .parse(source, None)
            .ok_or_else(|| MarginaliaError::Markdown("block parse was cancelled".into()))?;

        let mut writer = Writer::new(&mut self.inline);
        writer.block(tree.root_node(), source)?;

        let mut flattened = writer.finish();
        flattened
            .inlines
            .sort_by_key(|inline| (inline.span.start, Reverse(inline.span.end)));
        Ok(flattened)
    }
}

struct Writer<'p> {
    inline: &'p mut Parser,
    text: String,
    chars: usize,
    inlines: Vec<InlineSpan>,
    list_depth: usize,
    fresh_list: bool,
    quote_depth: usize,
}

impl<'p> Writer<'p> {
    fn new(inline: &'p mut Parser) -> Self {
        Self {
            inline,
            text: String::new(),
            chars: 0,
            inlines: Vec::new(),
            list_depth: 0,
            fresh_list: false,
            quote_depth: 0,
        }
    }

    fn finish(self) -> Flattened {
        Flattened {
            text: self.text,
            inlines: self.inlines,
        }
    }

    fn push(&mut self, s: &str) {
        self.text.push_str(s);
        self.chars += s.chars().count();
    }

    /// Separate the next block from what was written before it
    fn begin_block(&mut self) {
        if !self.text.is_empty() {
            let tight = self.list_depth > 0 && !self.fresh_list;
            self.push(if tight { "\n" } else { "\n\n" });
        }
        self.fresh_list = false;
    }

    fn block(&mut self, node: Node<'_>, source: &str) -> Result<()> {
        match node.kind() {
            "paragraph" | "atx_heading" => {
                for child in children(node) {
                    if child.kind() == "inline" {
                        let cleaned = self.clean_lines(&source[child.byte_range()]);
                        if !cleaned.is_empty() {
                            self.begin_block();
                            self.inline_text(&cleaned)?;
                        }
                    }
                }
            }
            "fenced_code_block" | "indented_code_block" => {
                let body = if node.kind() == "fenced_code_block" {
                    children(node)
                        .into_iter()
                        .find(|child| child.kind() == "code_fence_content")
                        .map(|child| &source[child.byte_range()])
                        .unwrap_or("")
                } else {
                    &source[node.byte_range()]
                };
                let cleaned = self.clean_lines(body);
                if !cleaned.is_empty() {
                    self.begin_block();
                    let start = self.chars;
                    self.push(&cleaned);
                    self.mark("code", start);
                }
            }
            "pipe_table_header" | "pipe_table_row" => {
                let cells: Vec<String> = children(node)
                    .into_iter()
                    .filter(|child| child.kind() == "pipe_table_cell")
                    .map(|child| source[child.byte_range()].trim().to_string())
                    .filter(|cell| !cell.is_empty())
                    .collect();
                if !cells.is_empty() {
                    self.begin_block();
                    self.inline_text(&cells.join(" "))?;
                }
            }
            "list" => {
                if self.list_depth == 0 {
                    self.fresh_list = true;
                }
                self.list_depth += 1;
                for child in children(node) {
                    self.block(child, source)?;
                }
                self.list_depth -= 1;
            }
            "block_quote" => {
                self.quote_depth += 1;
                for child in children(node) {
                    self.block(child, source)?;
                }
                self.quote_depth -= 1;
            }
            "html_block" | "thematic_break" | "link_reference_definition"
            | "pipe_table_delimiter_row" => {}
            _ => {
                for child in children(node) {
                    if child.is_named() {
                        self.block(child, source)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Strip container prefixes and indentation line by line
    fn clean_lines(&self, raw: &str) -> String {
        raw.split('\n')
            .map(|line| {
                let line = if self.quote_depth > 0 {
                    QUOTE_PREFIX.replace(line, "")
                } else {
                    line.into()
                };
                line.trim().to_string()
            })
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn inline_text(&mut self, text: &str) -> Result<()> {
        let tree = self
            .inline
            .parse(text, None)
            .ok_or_else(|| MarginaliaError::Markdown("inline parse was cancelled".into()))?;
        self.emit(tree.root_node(), text);
        Ok(())
    }

    fn mark(&mut self, tag: &'static str, start: usize) {
        if self.chars > start {
            self.inlines.push(InlineSpan {
                tag,
                span: start..self.chars,
            });
        }
    }

    fn emit(&mut self, node: Node<'_>, text: &str) {
        match node.kind() {
            "emphasis_delimiter" | "code_span_delimiter" | "link_destination" | "link_title"
            | "link_label" | "html_tag" | "image" | "latex_block" => {}
            "backslash_escape" => {
                let escaped: String = text[node.byte_range()].chars().skip(1).collect();
                self.push(&escaped);
            }
            "hard_line_break" => self.push("\n"),
            "emphasis" => self.tagged("em", node, text, Skip::Delimiters),
            "strong_emphasis" => self.tagged("strong", node, text, Skip::Delimiters),
            "strikethrough" => self.tagged("del", node, text, Skip::Delimiters),
            "code_span" => self.tagged("code", node, text, Skip::Delimiters),
            "inline_link" | "full_reference_link" | "collapsed_reference_link"
            | "shortcut_link" => {
                let start = self.chars;
                for child in children(node) {
                    if child.kind() == "link_text" {
                        self.emit_children(child, text, Skip::Anonymous);
                    }
                }
                self.mark("a", start);
            }
            "uri_autolink" | "email_autolink" => {
                let start = self.chars;
                self.push(text[node.byte_range()].trim_matches(|c: char| c == '<' || c == '>'));
                self.mark("a", start);
            }
            _ => self.emit_children(node, text, Skip::Nothing),
        }
    }

    fn tagged(&mut self, tag: &'static str, node: Node<'_>, text: &str, skip: Skip) {
        let start = self.chars;
        self.emit_children(node, text, skip);
        self.mark(tag, start);
    }

    /// Emit a node's own text between its children, then each child
    fn emit_children(&mut self, node: Node<'_>, text: &str, skip: Skip) {
        let mut cursor = node.start_byte();
        for child in children(node) {
            self.push(&text[cursor..child.start_byte()]);
            if !skip.skips(child, text) {
                self.emit(child, text);
            }
            cursor = child.end_byte();
        }
        self.push(&text[cursor..node.end_byte()]);
    }
}

#[derive(Debug, Clone, Copy)]
enum Skip {
    Nothing,
    /// Bracket and parenthesis tokens inside link text
    Anonymous,
    /// Runs of `*`, `_`, `~` or backticks opening and closing a span
    Delimiters,
}

impl Skip {
    fn skips(self, node: Node<'_>, text: &str) -> bool {
        match self {
            Self::Nothing => false,
            Self::Anonymous => !node.is_named(),
            Self::Delimiters => {
                node.kind().ends_with("_delimiter")
                    || (!node.is_named()
                        && text[node.byte_range()]
                            .chars()
                            .all(|c| matches!(c, '*' | '_' | '~' | '`')))
            }
        }
    }
}

fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span_text(flat: &Flattened, inline: &InlineSpan) -> String {
        flat.text
            .chars()
            .skip(inline.span.start)
            .take(inline.span.len())
            .collect()
    }

    #[test]
    fn test_detects_markdown() {
        assert!(is_markdown("# Title\n\nBody."));
        assert!(is_markdown("Rates were **held** again."));
        assert!(is_markdown("See [the report](https://example.com)."));
        assert!(is_markdown("Intro\n- first\n- second"));
        assert!(is_markdown("> quoted"));
        assert!(is_markdown("1. step one"));
        assert!(!is_markdown("Plain prose. Nothing else here!"));
        assert!(!is_markdown("Costs rose 5% in 2024. Analysts shrugged."));
    }

    #[test]
    fn test_headings_and_paragraphs_become_blocks() {
        let flat = flatten("# Rates\n\nPrices climbed.\nEconomists worried.\n").unwrap();
        assert_eq!(flat.text, "Rates\n\nPrices climbed.\nEconomists worried.");
    }

    #[test]
    fn test_emphasis_and_links_keep_their_text() {
        let flat =
            flatten("Rates were **held** at *five* percent, per [the bank](https://b.example).")
                .unwrap();
        assert_eq!(flat.text, "Rates were held at five percent, per the bank.");

        let tags: Vec<(&str, String)> = flat
            .inlines
            .iter()
            .map(|inline| (inline.tag, span_text(&flat, inline)))
            .collect();
        assert_eq!(
            tags,
            vec![
                ("strong", "held".to_string()),
                ("em", "five".to_string()),
                ("a", "the bank".to_string()),
            ]
        );
    }

    #[test]
    fn test_list_items_are_lines_of_one_block() {
        let flat = flatten("Intro.\n\n- first item\n- second item\n\nOutro.").unwrap();
        assert_eq!(flat.text, "Intro.\n\nfirst item\nsecond item\n\nOutro.");
    }

    #[test]
    fn test_quotes_and_code() {
        let flat = flatten("> Quoted line.\n> Still quoted.\n\nUse `cargo` daily.").unwrap();
        assert_eq!(flat.text, "Quoted line.\nStill quoted.\n\nUse cargo daily.");
        assert_eq!(flat.inlines.len(), 1);
        assert_eq!(flat.inlines[0].tag, "code");
        assert_eq!(span_text(&flat, &flat.inlines[0]), "cargo");
    }

    #[test]
    fn test_images_are_dropped() {
        let flat = flatten("Chart below. ![rates chart](chart.png)").unwrap();
        assert_eq!(flat.text.trim_end(), "Chart below.");
    }
}
