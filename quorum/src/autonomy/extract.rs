//! Code extraction from free-text agent responses
//!
//! Best-effort heuristic with a documented fallback chain: fenced code
//! block, then a labeled `Corrected_Code:` section, then a last-resort
//! "looks like code" check. Kept in one place so the ambiguity stays
//! contained and independently testable.

use regex::Regex;

/// Extract executable code from an agent response.
///
/// Fallback chain:
/// 1. ```python fenced block (first match)
/// 2. any ``` fenced block (longest match)
/// 3. `Corrected_Code:` labeled section
/// 4. the whole text, when it looks like code
pub fn extract_code(content: &str) -> Option<String> {
    let python_block =
        Regex::new(r"(?s)```python\s*\n(.*?)\n```").expect("fence pattern compiles");
    if let Some(capture) = python_block.captures(content) {
        return Some(capture[1].trim().to_string());
    }

    let any_block = Regex::new(r"(?s)```[a-zA-Z0-9]*\s*\n(.*?)\n```").expect("fence pattern compiles");
    let longest = any_block
        .captures_iter(content)
        .map(|c| c[1].trim().to_string())
        .max_by_key(|block| block.len());
    if let Some(block) = longest {
        return Some(block);
    }

    let labeled = Regex::new(r"(?s)Corrected_Code:\s*\n(.*?)(?:\n[A-Z][A-Za-z_]*:|\z)")
        .expect("label pattern compiles");
    if let Some(capture) = labeled.captures(content) {
        let section = capture[1].trim();
        if !section.is_empty() {
            return Some(section.to_string());
        }
    }

    if looks_like_code(content) {
        return Some(content.trim().to_string());
    }

    None
}

/// Last-resort heuristic: the text carries structural code markers
fn looks_like_code(content: &str) -> bool {
    content.contains("def ")
        || content.contains("import ")
        || content.contains("class ")
        || content.contains("return ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_python_fence_preferred() {
        let response = "Here you go:\n```python\ndef run(m, c):\n    return {}\n```\nand some text";
        assert_eq!(
            extract_code(response).unwrap(),
            "def run(m, c):\n    return {}"
        );
    }

    #[test]
    fn test_plain_fence_takes_longest() {
        let response = "```\nshort\n```\nmore\n```\na much longer block\nwith two lines\n```";
        assert_eq!(
            extract_code(response).unwrap(),
            "a much longer block\nwith two lines"
        );
    }

    #[test]
    fn test_labeled_section() {
        let response = "Analysis: it was broken\nCorrected_Code:\ndef run(m, c):\n    return {'ok': True}\nKey_Changes: fixed return";
        let code = extract_code(response).unwrap();
        assert!(code.starts_with("def run"));
        assert!(!code.contains("Key_Changes"));
    }

    #[test]
    fn test_bare_code_heuristic() {
        let response = "import json\ndef run(m, c):\n    return {}";
        assert_eq!(extract_code(response).unwrap(), response);
    }

    #[test]
    fn test_prose_yields_none() {
        assert!(extract_code("I would suggest rethinking the approach entirely.").is_none());
    }
}
