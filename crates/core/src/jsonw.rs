// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Append-only JSON emitter.
//!
//! A small builder over a byte buffer plus a stack of open brackets. Callers
//! drive it top-down (`object_begin`, `object_string`, ..., `end`) and the
//! writer asserts the calls match the open context, so a malformed document
//! is a caught programming error rather than bad output. Used by telemetry
//! for structured event emission.

/// JSON builder. `pretty` selects two-space indented output; compact output
/// has no whitespace at all.
#[derive(Clone, Default, Debug)]
pub struct JsonWriter {
    buf: String,
    open_stack: Vec<char>,
    pretty: bool,
    need_comma: bool,
}

impl JsonWriter {
    pub fn object_begin(pretty: bool) -> Self {
        let mut jw = Self::default();
        jw.pretty = pretty;
        jw.begin('{');
        jw
    }

    pub fn array_begin(pretty: bool) -> Self {
        let mut jw = Self::default();
        jw.pretty = pretty;
        jw.begin('[');
        jw
    }

    /// True once every opened bracket has been closed.
    pub fn is_terminated(&self) -> bool {
        self.open_stack.is_empty()
    }

    /// The rendered document. Asserts the document is complete.
    pub fn as_str(&self) -> &str {
        self.assert_is_terminated();
        &self.buf
    }

    // ---- object context ----

    pub fn object_string(&mut self, key: &str, value: &str) {
        self.object_common(key);
        self.append_quoted_string(value);
    }

    pub fn object_int(&mut self, key: &str, value: i64) {
        self.object_common(key);
        self.buf.push_str(&value.to_string());
    }

    pub fn object_double(&mut self, key: &str, precision: i32, value: f64) {
        self.object_common(key);
        self.fmt_double(precision, value);
    }

    pub fn object_bool(&mut self, key: &str, value: bool) {
        self.object_common(key);
        self.buf.push_str(if value { "true" } else { "false" });
    }

    pub fn object_null(&mut self, key: &str) {
        self.object_common(key);
        self.buf.push_str("null");
    }

    /// Splice a terminated sub-document as the value of `key`.
    pub fn object_sub_jw(&mut self, key: &str, value: &JsonWriter) {
        value.assert_is_terminated();
        self.object_common(key);
        self.append_sub_jw(value);
    }

    pub fn object_inline_begin_object(&mut self, key: &str) {
        self.object_common(key);
        self.begin('{');
    }

    pub fn object_inline_begin_array(&mut self, key: &str) {
        self.object_common(key);
        self.begin('[');
    }

    // ---- array context ----

    pub fn array_string(&mut self, value: &str) {
        self.array_common();
        self.append_quoted_string(value);
    }

    pub fn array_int(&mut self, value: i64) {
        self.array_common();
        self.buf.push_str(&value.to_string());
    }

    pub fn array_double(&mut self, precision: i32, value: f64) {
        self.array_common();
        self.fmt_double(precision, value);
    }

    pub fn array_bool(&mut self, value: bool) {
        self.array_common();
        self.buf.push_str(if value { "true" } else { "false" });
    }

    pub fn array_null(&mut self) {
        self.array_common();
        self.buf.push_str("null");
    }

    pub fn array_sub_jw(&mut self, value: &JsonWriter) {
        value.assert_is_terminated();
        self.array_common();
        self.append_sub_jw(value);
    }

    pub fn array_inline_begin_object(&mut self) {
        self.array_common();
        self.begin('{');
    }

    pub fn array_inline_begin_array(&mut self) {
        self.array_common();
        self.begin('[');
    }

    /// Close the innermost open bracket.
    pub fn end(&mut self) {
        assert!(
            !self.open_stack.is_empty(),
            "json-writer: too many end() calls: {:?}",
            self.buf
        );
        let ch_open = self.open_stack.pop().unwrap_or('{');
        // The value just closed counts as a member at the parent level.
        self.need_comma = true;

        if self.pretty {
            self.buf.push('\n');
            self.indent();
        }
        self.buf.push(if ch_open == '{' { '}' } else { ']' });
    }

    // ---- internals ----

    fn begin(&mut self, ch_open: char) {
        self.buf.push(ch_open);
        self.open_stack.push(ch_open);
        self.need_comma = false;
    }

    fn object_common(&mut self, key: &str) {
        assert!(
            self.open_stack.last() == Some(&'{'),
            "json-writer: not in object: {key:?}"
        );
        self.maybe_add_comma();
        if self.pretty {
            self.buf.push('\n');
            self.indent();
        }
        self.append_quoted_string(key);
        self.buf.push(':');
        if self.pretty {
            self.buf.push(' ');
        }
    }

    fn array_common(&mut self) {
        assert!(self.open_stack.last() == Some(&'['), "json-writer: not in array");
        self.maybe_add_comma();
        if self.pretty {
            self.buf.push('\n');
            self.indent();
        }
    }

    /// Add a comma if we have already seen a member at this level.
    fn maybe_add_comma(&mut self) {
        if self.need_comma {
            self.buf.push(',');
        } else {
            self.need_comma = true;
        }
    }

    fn indent(&mut self) {
        for _ in 0..self.open_stack.len() {
            self.buf.push_str("  ");
        }
    }

    fn fmt_double(&mut self, precision: i32, value: f64) {
        // Negative precision mirrors a plain "%f".
        let precision = if precision < 0 { 6 } else { precision as usize };
        self.buf.push_str(&format!("{value:.precision$}"));
    }

    fn append_quoted_string(&mut self, s: &str) {
        self.buf.push('"');
        for ch in s.chars() {
            match ch {
                '"' => self.buf.push_str("\\\""),
                '\\' => self.buf.push_str("\\\\"),
                '\n' => self.buf.push_str("\\n"),
                '\r' => self.buf.push_str("\\r"),
                '\t' => self.buf.push_str("\\t"),
                '\u{0c}' => self.buf.push_str("\\f"),
                '\u{08}' => self.buf.push_str("\\b"),
                c if (c as u32) < 0x20 => {
                    self.buf.push_str(&format!("\\u{:04x}", c as u32));
                }
                c => self.buf.push(c),
            }
        }
        self.buf.push('"');
    }

    /// Splice a terminated child at the current value position.
    ///
    /// A pretty child under a pretty parent is re-indented to line up; a
    /// pretty child under a compact parent is compacted on the fly; a
    /// compact child is left alone either way.
    fn append_sub_jw(&mut self, value: &JsonWriter) {
        if self.pretty && !self.open_stack.is_empty() && value.pretty {
            let extra = " ".repeat(self.open_stack.len() * 2);
            for (k, line) in value.buf.split('\n').enumerate() {
                if k > 0 {
                    self.buf.push('\n');
                    self.buf.push_str(&extra);
                }
                self.buf.push_str(line);
            }
            return;
        }
        if !self.pretty && value.pretty {
            for line in value.buf.split('\n') {
                self.buf.push_str(line.trim_start_matches(' '));
            }
            return;
        }
        self.buf.push_str(&value.buf);
    }

    fn assert_is_terminated(&self) {
        assert!(self.is_terminated(), "json-writer: missing end(): {:?}", self.buf);
    }
}

#[cfg(test)]
#[path = "jsonw_tests.rs"]
mod tests;
