/// Split a format-style template into the literal pieces around its `{}` holes.
///
/// `{{` and `}}` stand for literal braces. Any other brace is kept verbatim. The result
/// always has one more piece than the template has holes.
pub(crate) fn split_template(template: &str) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match (c, chars.peek()) {
            ('{', Some('{')) | ('}', Some('}')) => {
                current.push(c);
                chars.next();
            }
            ('{', Some('}')) => {
                chars.next();
                pieces.push(std::mem::take(&mut current));
            }
            _ => current.push(c),
        }
    }
    pieces.push(current);
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_holes() {
        assert_eq!(
            split_template("SELECT * FROM {} WHERE id = {}"),
            vec!["SELECT * FROM ", " WHERE id = ", ""]
        );
    }

    #[test]
    fn keeps_escaped_and_stray_braces() {
        assert_eq!(
            split_template("SELECT '{{\"a\": 1}}', {} -- {x}"),
            vec!["SELECT '{\"a\": 1}', ", " -- {x}"]
        );
        assert_eq!(split_template("no holes"), vec!["no holes"]);
    }
}
