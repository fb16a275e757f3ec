use std::ops::Range;

use sourcemap::SourceMapBuilder;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
  #[error("edit range {start}..{end} is out of bounds for a {len}-byte source")]
  OutOfBounds {
    start: usize,
    end: usize,
    len: usize,
  },
  #[error("edit range {start}..{end} does not fall on character boundaries")]
  NotCharBoundary { start: usize, end: usize },
  #[error("edit ranges {first_start}..{first_end} and {second_start}..{second_end} overlap")]
  Overlap {
    first_start: usize,
    first_end: usize,
    second_start: usize,
    second_end: usize,
  },
}

#[derive(Debug, Clone)]
struct Edit {
  start: usize,
  end: usize,
  text: String,
}

/// Immutable original text plus a log of byte-range edits.
///
/// `finish` renders the rewritten text; `finish_with_map` additionally builds
/// a source map from the edit log. Replacement ranges must not overlap.
/// Inserts at equal offsets apply in insertion order and sort before a
/// replacement starting at the same offset.
#[derive(Debug)]
pub struct TextEditor<'a> {
  source: &'a str,
  edits: Vec<Edit>,
}

impl<'a> TextEditor<'a> {
  pub fn new(source: &'a str) -> Self {
    Self {
      source,
      edits: Vec::new(),
    }
  }

  /// Insert `text` immediately before byte `offset` of the original.
  pub fn insert(&mut self, offset: usize, text: impl Into<String>) {
    self.edits.push(Edit {
      start: offset,
      end: offset,
      text: text.into(),
    });
  }

  /// Replace the byte range with `text`.
  pub fn replace(&mut self, range: Range<usize>, text: impl Into<String>) {
    self.edits.push(Edit {
      start: range.start,
      end: range.end,
      text: text.into(),
    });
  }

  pub fn finish(self) -> Result<String, EditError> {
    let (output, _) = self.render(None)?;
    Ok(output)
  }

  /// Render the rewritten text and a source map over the original.
  pub fn finish_with_map(
    self,
    file_name: &str,
  ) -> Result<(String, sourcemap::SourceMap), EditError> {
    let mut builder = SourceMapBuilder::new(None);
    let source_index = builder.add_source(file_name);
    builder.set_source_contents(source_index, Some(self.source));
    let (output, builder) = self.render(Some((builder, file_name)))?;
    let builder = builder.expect("builder threaded through render");
    Ok((output, builder.into_sourcemap()))
  }

  fn sorted_edits(&self) -> Result<Vec<Edit>, EditError> {
    let len = self.source.len();
    for edit in &self.edits {
      if edit.start > edit.end || edit.end > len {
        return Err(EditError::OutOfBounds {
          start: edit.start,
          end: edit.end,
          len,
        });
      }
      if !self.source.is_char_boundary(edit.start) || !self.source.is_char_boundary(edit.end) {
        return Err(EditError::NotCharBoundary {
          start: edit.start,
          end: edit.end,
        });
      }
    }

    let mut edits = self.edits.clone();
    // Stable: inserts first at equal offsets, then earlier-logged edits.
    edits.sort_by_key(|edit| (edit.start, edit.end));

    for pair in edits.windows(2) {
      if pair[0].end > pair[1].start {
        return Err(EditError::Overlap {
          first_start: pair[0].start,
          first_end: pair[0].end,
          second_start: pair[1].start,
          second_end: pair[1].end,
        });
      }
    }

    Ok(edits)
  }

  fn render(
    self,
    map: Option<(SourceMapBuilder, &str)>,
  ) -> Result<(String, Option<SourceMapBuilder>), EditError> {
    let edits = self.sorted_edits()?;
    let lines = LineIndex::new(self.source);

    let mut output = String::with_capacity(self.source.len());
    let mut out_line = 0u32;
    let mut out_col = 0u32;
    let mut cursor = 0usize;
    let mut mapper = map.map(|(builder, file_name)| Mapper {
      builder,
      file_name: file_name.to_string(),
    });

    fn append(output: &mut String, line: &mut u32, col: &mut u32, text: &str) {
      output.push_str(text);
      for ch in text.chars() {
        if ch == '\n' {
          *line += 1;
          *col = 0;
        } else {
          *col += ch.len_utf8() as u32;
        }
      }
    }

    for edit in &edits {
      if cursor < edit.start {
        let segment = &self.source[cursor..edit.start];
        if let Some(mapper) = mapper.as_mut() {
          mapper.map_segment(segment, cursor, out_line, out_col, &lines);
        }
        append(&mut output, &mut out_line, &mut out_col, segment);
      }
      if !edit.text.is_empty() && edit.start < edit.end {
        // Replacement text maps back to the start of the replaced range.
        if let Some(mapper) = mapper.as_mut() {
          mapper.add_token(out_line, out_col, edit.start, &lines);
        }
      }
      append(&mut output, &mut out_line, &mut out_col, &edit.text);
      cursor = edit.end;
    }

    if cursor < self.source.len() {
      let segment = &self.source[cursor..];
      if let Some(mapper) = mapper.as_mut() {
        mapper.map_segment(segment, cursor, out_line, out_col, &lines);
      }
      append(&mut output, &mut out_line, &mut out_col, segment);
    }

    Ok((output, mapper.map(|m| m.builder)))
  }
}

struct Mapper {
  builder: SourceMapBuilder,
  file_name: String,
}

impl Mapper {
  fn add_token(&mut self, dst_line: u32, dst_col: u32, src_offset: usize, lines: &LineIndex) {
    let (src_line, src_col) = lines.line_col(src_offset);
    self.builder.add(
      dst_line,
      dst_col,
      src_line,
      src_col,
      Some(&self.file_name),
      None,
      false,
    );
  }

  /// One token at the segment start, one at each original line boundary
  /// inside the segment.
  fn map_segment(
    &mut self,
    segment: &str,
    src_offset: usize,
    dst_line: u32,
    dst_col: u32,
    lines: &LineIndex,
  ) {
    self.add_token(dst_line, dst_col, src_offset, lines);
    let mut line = dst_line;
    for (index, byte) in segment.bytes().enumerate() {
      if byte == b'\n' && index + 1 < segment.len() {
        line += 1;
        self.add_token(line, 0, src_offset + index + 1, lines);
      }
    }
  }
}

struct LineIndex {
  starts: Vec<usize>,
}

impl LineIndex {
  fn new(source: &str) -> Self {
    let mut starts = vec![0];
    for (index, byte) in source.bytes().enumerate() {
      if byte == b'\n' {
        starts.push(index + 1);
      }
    }
    Self { starts }
  }

  fn line_col(&self, offset: usize) -> (u32, u32) {
    let line = match self.starts.binary_search(&offset) {
      Ok(line) => line,
      Err(insert) => insert - 1,
    };
    (line as u32, (offset - self.starts[line]) as u32)
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  #[test]
  fn renders_unedited_source() {
    let editor = TextEditor::new("const a = 1;\n");
    assert_eq!(editor.finish().unwrap(), "const a = 1;\n");
  }

  #[test]
  fn applies_replacements_and_inserts() {
    let source = "const a = css`one`;\n";
    let mut editor = TextEditor::new(source);
    editor.insert(0, "import \"x.css\";\n");
    editor.replace(10..18, "\"severed-abc\"");
    assert_eq!(
      editor.finish().unwrap(),
      "import \"x.css\";\nconst a = \"severed-abc\";\n"
    );
  }

  #[test]
  fn inserts_at_equal_offsets_keep_insertion_order() {
    let mut editor = TextEditor::new("stmt;");
    editor.insert(0, "first;\n");
    editor.insert(0, "second;\n");
    assert_eq!(editor.finish().unwrap(), "first;\nsecond;\nstmt;");
  }

  #[test]
  fn insert_at_replacement_start_applies_before_it() {
    let mut editor = TextEditor::new("abcdef");
    editor.replace(2..4, "XY");
    editor.insert(2, "-");
    assert_eq!(editor.finish().unwrap(), "ab-XYef");
  }

  #[test]
  fn rejects_overlapping_replacements() {
    let mut editor = TextEditor::new("abcdef");
    editor.replace(0..4, "x");
    editor.replace(2..6, "y");
    assert!(matches!(editor.finish(), Err(EditError::Overlap { .. })));
  }

  #[test]
  fn rejects_out_of_bounds_edits() {
    let mut editor = TextEditor::new("ab");
    editor.replace(1..9, "x");
    assert!(matches!(editor.finish(), Err(EditError::OutOfBounds { .. })));
  }

  #[test]
  fn rejects_edits_inside_multibyte_chars() {
    let mut editor = TextEditor::new("é!");
    editor.replace(1..2, "x");
    assert!(matches!(editor.finish(), Err(EditError::NotCharBoundary { .. })));
  }

  #[test]
  fn source_map_points_back_into_the_original() {
    let source = "const a = css`one`;\nconst b = 2;\n";
    let mut editor = TextEditor::new(source);
    editor.insert(0, "import \"x.css\";\n");
    editor.replace(10..18, "\"severed-abc\"");
    let (output, map) = editor.finish_with_map("app.js").unwrap();
    assert_eq!(
      output,
      "import \"x.css\";\nconst a = \"severed-abc\";\nconst b = 2;\n"
    );

    // `const a` moved to line 1 and still maps to original line 0.
    let token = map.lookup_token(1, 0).unwrap();
    assert_eq!(token.get_src_line(), 0);
    assert_eq!(token.get_src_col(), 0);

    // The replacement maps to the start of the replaced range.
    let token = map.lookup_token(1, 10).unwrap();
    assert_eq!(token.get_src_line(), 0);
    assert_eq!(token.get_src_col(), 10);

    // `const b` on line 2 maps to original line 1.
    let token = map.lookup_token(2, 0).unwrap();
    assert_eq!(token.get_src_line(), 1);
    assert_eq!(token.get_src_col(), 0);

    assert_eq!(map.get_source_contents(0), Some(source));
  }
}
