use serde::{Deserialize, Serialize};

/// How a dialect spells the n-th bound parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaceholderStyle {
    /// PostgreSQL-style placeholders like `$1`.
    Dollar,
    /// Positional `?` (MySQL, SQLite).
    Question,
    /// SQLite-style numbered placeholders like `?1`.
    NumberedQuestion,
    /// ODBC-style named placeholders `@a`, `@b`, ..., `@z`, `@aa` (SQL Server).
    AtLetter,
}

impl PlaceholderStyle {
    /// Render the placeholder for the 1-based parameter `index`.
    #[must_use]
    pub fn render(self, index: usize) -> String {
        match self {
            PlaceholderStyle::Dollar => format!("${index}"),
            PlaceholderStyle::Question => "?".to_string(),
            PlaceholderStyle::NumberedQuestion => format!("?{index}"),
            PlaceholderStyle::AtLetter => format!("@{}", letters(index)),
        }
    }
}

/// Bijective base-26: 1 -> a, 26 -> z, 27 -> aa.
fn letters(mut index: usize) -> String {
    let mut out = Vec::new();
    while index > 0 {
        let rem = (index - 1) % 26;
        out.push(b'a' + u8::try_from(rem).unwrap_or(0));
        index = (index - 1) / 26;
    }
    out.reverse();
    String::from_utf8(out).unwrap_or_default()
}

/// Hands out placeholders in order while a fragment compiles.
///
/// Dialect hooks receive this so a single helper or custom segment can emit as many
/// placeholders as it needs.
pub struct Placeholders<'a> {
    render: &'a (dyn Fn(usize) -> String + Send + Sync),
    count: usize,
}

impl<'a> Placeholders<'a> {
    pub(crate) fn new(render: &'a (dyn Fn(usize) -> String + Send + Sync)) -> Self {
        Self { render, count: 0 }
    }

    /// Placeholder for the next parameter.
    pub fn next_placeholder(&mut self) -> String {
        self.count += 1;
        (self.render)(self.count)
    }

    /// Advance past parameters that arrived pre-bound inside literal SQL.
    pub(crate) fn skip(&mut self, n: usize) {
        self.count += n;
    }

    /// Number of placeholders consumed so far.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_each_style() {
        assert_eq!(PlaceholderStyle::Dollar.render(3), "$3");
        assert_eq!(PlaceholderStyle::Question.render(3), "?");
        assert_eq!(PlaceholderStyle::NumberedQuestion.render(3), "?3");
        assert_eq!(PlaceholderStyle::AtLetter.render(1), "@a");
        assert_eq!(PlaceholderStyle::AtLetter.render(26), "@z");
        assert_eq!(PlaceholderStyle::AtLetter.render(27), "@aa");
        assert_eq!(PlaceholderStyle::AtLetter.render(53), "@ba");
    }

    #[test]
    fn skipped_parameters_shift_later_placeholders() {
        let render = |i: usize| format!("${i}");
        let mut placeholders = Placeholders::new(&render);
        assert_eq!(placeholders.next_placeholder(), "$1");
        placeholders.skip(2);
        assert_eq!(placeholders.next_placeholder(), "$4");
        assert_eq!(placeholders.count(), 4);
    }
}
