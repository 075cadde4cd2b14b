//! Deterministic output filenames derived from generation parameters.
//!
//! Names are not unique: two prompts sharing a sanitized 50 character prefix with the
//! same `steps` and `scale` map to the same file, and the later write replaces it.

/// Maximum number of characters kept from the sanitized prompt.
pub const MAX_PROMPT_CHARS: usize = 50;

/// Characters dropped because they would escape the output directory or break the URL.
const UNSAFE_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|', '#', '%'];

/// Turns a prompt into a filesystem and URL safe name segment.
pub fn sanitize_prompt(prompt: &str) -> String {
    prompt
        .chars()
        .filter_map(|c| match c {
            ' ' => Some('_'),
            ',' | '.' => None,
            c if c.is_control() || UNSAFE_CHARS.contains(&c) => None,
            c => Some(c),
        })
        .take(MAX_PROMPT_CHARS)
        .collect()
}

/// Formats `scale` like a Python float repr: a fractional part is kept (`7` → `7.0`)
/// and exponents carry a sign and at least two digits (`1e-05`, `1.5e+16`).
fn format_scale(scale: f64) -> String {
    let repr = format!("{scale:?}");
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => repr,
    }
}

/// `<sanitized prompt>_<steps>_<scale>.png`
pub fn output_filename(prompt: &str, steps: usize, scale: f64) -> String {
    format!(
        "{}_{}_{}.png",
        sanitize_prompt(prompt),
        steps,
        format_scale(scale)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn red_fox() {
        assert_eq!(
            output_filename("a red fox in snow", 20, 7.5),
            "a_red_fox_in_snow_20_7.5.png"
        );
    }

    #[test]
    fn whole_scales_keep_a_fraction() {
        assert_eq!(output_filename("cat", 50, 7.0), "cat_50_7.0.png");
        assert_eq!(output_filename("cat", 1, 0.25), "cat_1_0.25.png");
    }

    #[test]
    fn tiny_and_huge_scales_use_two_digit_exponents() {
        assert_eq!(output_filename("cat", 5, 0.0001), "cat_5_0.0001.png");
        assert_eq!(output_filename("cat", 5, 0.00001), "cat_5_1e-05.png");
        assert_eq!(format_scale(2.5e-7), "2.5e-07");
        assert_eq!(format_scale(1e-100), "1e-100");
        assert_eq!(format_scale(1e15), "1000000000000000.0");
        assert_eq!(format_scale(1.5e16), "1.5e+16");
    }

    #[test]
    fn same_inputs_same_name() {
        let a = output_filename("Hello, world. Again", 30, 9.0);
        let b = output_filename("Hello, world. Again", 30, 9.0);
        assert_eq!(a, b);
        assert_eq!(a, "Hello_world_Again_30_9.0.png");
    }

    #[test]
    fn long_prompts_truncate_to_fifty_characters() {
        let prompt = "abcdefghij".repeat(8);
        assert_eq!(prompt.chars().count(), 80);
        let segment = sanitize_prompt(&prompt);
        assert_eq!(segment.chars().count(), MAX_PROMPT_CHARS);
        assert_eq!(
            output_filename(&prompt, 20, 7.5),
            format!("{}_20_7.5.png", &prompt[..50])
        );
    }

    #[test]
    fn truncation_happens_after_stripping() {
        // 60 periods vanish entirely, so the following word survives.
        let prompt = format!("{}tail", ".".repeat(60));
        assert_eq!(sanitize_prompt(&prompt), "tail");
    }

    #[test]
    fn truncation_counts_characters_not_bytes() {
        let prompt = "é".repeat(60);
        let segment = sanitize_prompt(&prompt);
        assert_eq!(segment.chars().count(), 50);
        assert_eq!(segment.len(), 100);
    }

    #[test]
    fn sanitized_segment_has_no_separators() {
        let prompts = [
            "a, b. c d",
            " leading and trailing ",
            "../../etc/passwd",
            "C:\\windows\\win.ini",
            "what? #1 100% <b>|\"x\"*",
            "tab\tand\nnewline",
            ",,,...   ",
        ];
        for prompt in prompts {
            let segment = sanitize_prompt(prompt);
            assert!(segment.chars().count() <= MAX_PROMPT_CHARS);
            assert!(
                !segment.contains(&[' ', ',', '.', '/', '\\', '?', '#', '%', '\n', '\t'][..]),
                "{prompt:?} -> {segment:?}"
            );
        }
    }

    #[test]
    fn path_traversal_stays_in_directory() {
        assert_eq!(
            output_filename("../../etc/passwd", 1, 1.0),
            "etcpasswd_1_1.0.png"
        );
    }

    #[test]
    fn colliding_prefixes_share_a_name() {
        let base = "x".repeat(50);
        assert_eq!(
            output_filename(&format!("{base}one"), 10, 5.0),
            output_filename(&format!("{base}two"), 10, 5.0)
        );
    }
}
