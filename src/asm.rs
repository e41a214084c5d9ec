//! The assembly document builder (§4.5, C6): an append-only, three-segment
//! monoid the code generator assembles bottom-up, then renders to RARS-
//! compatible RISC-V assembly text.
//!
//! Grounded in an accumulation style of building a program incrementally by
//! appending instructions/comments to growing buffers, generalised here to
//! three named buffers instead of one, matching §4.5's "data / text /
//! post-text" segmentation (see `DESIGN.md` for the grounding source).

use std::fmt::Write as _;

/// One line of assembly output: an instruction, a label definition, a
/// directive, or a comment. Kept as pre-rendered text rather than a
/// structured instruction type, mirroring §4.5 ("the document is a sequence
/// of textual lines; the code generator is responsible for their
/// correctness, the document just concatenates them in order").
#[derive(Clone, Debug, PartialEq, Eq)]
enum Line {
  Label(String),
  Instr(String),
  Directive(String),
  Comment(String),
  Blank,
}

impl Line {
  fn render(&self, out: &mut String) {
    match self {
      Line::Label(l) => { let _ = writeln!(out, "{l}:"); }
      Line::Instr(i) => { let _ = writeln!(out, "  {i}"); }
      Line::Directive(d) => { let _ = writeln!(out, "{d}"); }
      Line::Comment(c) => { let _ = writeln!(out, "  # {c}"); }
      Line::Blank => { let _ = writeln!(out); }
    }
  }
}

/// The three-segment assembly document (§4.5 "Assembly document").
///
/// * `data` holds `.data`-section directives (string/array literals, global
///   cells for spilled globals).
/// * `text` holds the "current" instruction stream, the segment every
///   emission helper appends to by default.
/// * `post_text` holds instructions that must follow everything emitted so
///   far but still precede nothing emitted later — used for helper/runtime
///   routines synthesized once a function body has already been emitted
///   (§4.5 "move text to post-text").
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Asm {
  data: Vec<Line>,
  text: Vec<Line>,
  post_text: Vec<Line>,
}

impl Asm {
  #[must_use] pub fn new() -> Self { Self::default() }

  /// Append a label definition to `text`.
  pub fn label(&mut self, name: impl Into<String>) -> &mut Self {
    self.text.push(Line::Label(name.into())); self
  }
  /// Append an instruction to `text`.
  pub fn instr(&mut self, text: impl Into<String>) -> &mut Self {
    self.text.push(Line::Instr(text.into())); self
  }
  /// Append a comment to `text`.
  pub fn comment(&mut self, text: impl Into<String>) -> &mut Self {
    self.text.push(Line::Comment(text.into())); self
  }
  /// Append a blank line to `text`, for readability between functions.
  pub fn blank_line(&mut self) -> &mut Self { self.text.push(Line::Blank); self }

  /// Append a `.data` directive (e.g. a `.word`/`.asciiz` literal).
  pub fn data_directive(&mut self, text: impl Into<String>) -> &mut Self {
    self.data.push(Line::Directive(text.into())); self
  }
  /// Append a label definition into the `.data` segment.
  pub fn data_label(&mut self, name: impl Into<String>) -> &mut Self {
    self.data.push(Line::Label(name.into())); self
  }

  /// Append a label into `post_text` (§4.5 "post-text").
  pub fn post_text_label(&mut self, name: impl Into<String>) -> &mut Self {
    self.post_text.push(Line::Label(name.into())); self
  }
  /// Append an instruction into `post_text`.
  pub fn post_text_instr(&mut self, text: impl Into<String>) -> &mut Self {
    self.post_text.push(Line::Instr(text.into())); self
  }

  /// Move everything currently in `text` to the end of `post_text`, leaving
  /// `text` empty (§4.5 "move text to post-text": used once a function's own
  /// body has been emitted, so a caller that emits a second function starts
  /// `text` fresh while the first function's body is preserved, verbatim and
  /// in order, after all future `text` content).
  pub fn move_text_to_post_text(&mut self) {
    self.post_text.append(&mut self.text);
  }

  /// Concatenate another document onto this one: segment-wise, in order
  /// (`data` to `data`, `text` to `text`, `post_text` to `post_text`). This
  /// is the monoid operation of §4.5 ("Assembly documents concatenate
  /// segment-wise; the empty document is the identity").
  pub fn append(&mut self, mut other: Asm) -> &mut Self {
    self.data.append(&mut other.data);
    self.text.append(&mut other.text);
    self.post_text.append(&mut other.post_text);
    self
  }

  /// `true` if every segment is empty.
  #[must_use] pub fn is_empty(&self) -> bool {
    self.data.is_empty() && self.text.is_empty() && self.post_text.is_empty()
  }

  /// Render the whole document to RARS-compatible assembly text: a `.data`
  /// section (if non-empty), then a `.text` section holding `text` followed
  /// by `post_text` in that order (§4.5 "Rendering").
  #[must_use] pub fn render(&self) -> String {
    let mut out = String::new();
    if !self.data.is_empty() {
      out.push_str(".data\n");
      for l in &self.data { l.render(&mut out); }
      out.push('\n');
    }
    out.push_str(".text\n");
    for l in self.text.iter().chain(self.post_text.iter()) { l.render(&mut out); }
    out
  }
}

impl Extend<Asm> for Asm {
  fn extend<I: IntoIterator<Item = Asm>>(&mut self, iter: I) {
    for doc in iter { self.append(doc); }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn render_places_data_before_text() {
    let mut a = Asm::new();
    a.data_label("msg").data_directive(".asciiz \"hi\"");
    a.label("main").instr("li a0, 1");
    let out = a.render();
    assert!(out.find(".data").unwrap() < out.find(".text").unwrap());
    assert!(out.find("msg:").unwrap() < out.find(".text").unwrap());
  }

  #[test]
  fn move_text_to_post_text_preserves_order_across_appends() {
    let mut a = Asm::new();
    a.label("f1").instr("nop");
    a.move_text_to_post_text();
    a.label("f2").instr("nop");
    let out = a.render();
    assert!(out.find("f1:").unwrap() < out.find("f2:").unwrap());
  }

  #[test]
  fn append_concatenates_segment_wise() {
    let mut a = Asm::new();
    a.label("a_label");
    let mut b = Asm::new();
    b.label("b_label");
    a.append(b);
    let out = a.render();
    assert!(out.find("a_label:").unwrap() < out.find("b_label:").unwrap());
  }

  #[test]
  fn empty_document_renders_to_just_the_text_header() {
    let a = Asm::new();
    assert_eq!(a.render(), ".text\n");
    assert!(a.is_empty());
  }
}
