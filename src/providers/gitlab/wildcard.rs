/// Case-sensitive match where `*` stands for any run of characters, empty included.
/// No other character is special.
pub fn wildcard_match(pattern: &str, candidate: &str) -> bool {
    let p = pattern.as_bytes();
    let c = candidate.as_bytes();
    let mut pi = 0usize;
    let mut ci = 0usize;
    let mut star = None;
    let mut resume_ci = 0usize;

    while ci < c.len() {
        if pi < p.len() && p[pi] == b'*' {
            star = Some(pi);
            pi += 1;
            resume_ci = ci;
        } else if pi < p.len() && p[pi] == c[ci] {
            pi += 1;
            ci += 1;
        } else if let Some(star_pi) = star {
            pi = star_pi + 1;
            resume_ci += 1;
            ci = resume_ci;
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|&b| b == b'*')
}

/// True when `item` matches at least one pattern. An empty list matches nothing.
pub fn matches_any<S: AsRef<str>>(item: &str, patterns: &[S]) -> bool {
    patterns
        .iter()
        .any(|pattern| wildcard_match(pattern.as_ref(), item))
}
