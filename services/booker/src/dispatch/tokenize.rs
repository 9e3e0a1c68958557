/// Lower-case, trim and split a command line.
///
/// Whitespace separates tokens except inside double quotes; the quotes
/// themselves are dropped. An unterminated quote runs to the end of input.
pub fn tokenize(text: &str) -> Vec<String> {
    let text = text.trim().to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut pending = false;

    for c in text.chars() {
        match c {
            '"' => {
                quoted = !quoted;
                pending = true;
            }
            c if c.is_whitespace() && !quoted => {
                if pending {
                    tokens.push(std::mem::take(&mut current));
                    pending = false;
                }
            }
            c => {
                current.push(c);
                pending = true;
            }
        }
    }

    if pending {
        tokens.push(current);
    }
    tokens
}
