use serde::{Deserialize, Serialize};

pub const DEFAULT_TAG: &str = "latest";
pub const DOCKER_HUB_REGISTRY: &str = "docker.io";
pub const UNKNOWN_REGISTRY: &str = "unknown";

/// Container image used by one job after variable substitution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedImage {
    /// Reference after substitution; prefixed with `docker.io/` when that
    /// registry was inferred
    pub link: String,
    pub registry: String,
    #[serde(rename = "image")]
    pub name: String,
    pub tag: String,
    pub job: String,
    /// Reference as written in the configuration, before substitution
    pub original: String,
}

impl ResolvedImage {
    pub fn new(job: &str, original: &str, resolved: &str) -> Self {
        let reference = ImageReference::parse(resolved);
        Self {
            link: reference.link,
            registry: reference.registry,
            name: reference.name,
            tag: reference.tag,
            job: job.to_string(),
            original: original.to_string(),
        }
    }
}

/// Registry, repository name and tag extracted from an image string.
///
/// Parsing never fails: shapes that cannot be split safely keep the whole
/// text as the name with an `unknown` registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub link: String,
    pub registry: String,
    pub name: String,
    pub tag: String,
}

impl ImageReference {
    pub fn parse(link: &str) -> Self {
        let mut reference = if link.contains('$') {
            let parts = parse_with_variables(link);
            Self {
                link: link.to_string(),
                registry: parts.registry,
                name: parts.name,
                tag: parts.tag,
            }
        } else {
            parse_literal(link)
        };

        if reference.name.trim().is_empty() && !link.trim().is_empty() {
            reference.name = link.to_string();
            reference.registry = UNKNOWN_REGISTRY.to_string();
            reference.tag = String::new();
        }
        reference
    }
}

#[derive(Debug)]
struct Parts {
    registry: String,
    name: String,
    tag: String,
}

impl Parts {
    fn new(registry: &str, name: &str, tag: &str) -> Self {
        Self {
            registry: registry.to_string(),
            name: name.to_string(),
            tag: tag.to_string(),
        }
    }

    fn unknown(name: &str, tag: &str) -> Self {
        Self::new(UNKNOWN_REGISTRY, name, tag)
    }
}

fn looks_like_registry(segment: &str) -> bool {
    segment.contains('.') || segment.contains(':')
}

fn count_dollars(s: &str) -> usize {
    s.matches('$').count()
}

fn parse_literal(link: &str) -> ImageReference {
    let with_default_registry = |target: &str| {
        let (name, tag) = split_name_tag(target);
        ImageReference {
            link: format!("{DOCKER_HUB_REGISTRY}/{link}"),
            registry: DOCKER_HUB_REGISTRY.to_string(),
            name,
            tag,
        }
    };

    let Some(slash) = link.find('/') else {
        return with_default_registry(link);
    };

    let prefix = &link[..slash];
    if looks_like_registry(prefix) {
        let (name, tag) = split_name_tag(&link[slash + 1..]);
        ImageReference {
            link: link.to_string(),
            registry: prefix.to_string(),
            name,
            tag,
        }
    } else {
        with_default_registry(link)
    }
}

/// `name:tag` split on colons; the tag defaults to `latest` and only the
/// second colon-separated field is kept.
fn split_name_tag(target: &str) -> (String, String) {
    let mut fields = target.split(':');
    let name = fields.next().unwrap_or_default().to_string();
    let tag = fields.next().unwrap_or(DEFAULT_TAG).to_string();
    (name, tag)
}

/// Tokens are a `$` followed by any run of ASCII alphanumerics or underscores.
fn variable_tokens(link: &str) -> Vec<&str> {
    let bytes = link.as_bytes();
    let mut tokens = Vec::new();
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'$' {
            let start = idx;
            let mut end = idx + 1;
            while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                end += 1;
            }
            tokens.push(&link[start..end]);
            idx = end;
        } else {
            idx += 1;
        }
    }
    tokens
}

/// Split at the last colon when the tail is a literal tag or holds exactly one `$`.
fn split_tag_loose(s: &str) -> Option<(&str, &str)> {
    let colon = s.rfind(':').filter(|&i| i > 0)?;
    let tail = &s[colon + 1..];
    let literal = !tail.contains('/') && !tail.contains('$');
    (literal || count_dollars(tail) == 1).then(|| (&s[..colon], tail))
}

/// Split at the last colon only when the tail is a literal tag.
fn split_literal_tag(s: &str) -> Option<(&str, &str)> {
    let colon = s.rfind(':').filter(|&i| i > 0)?;
    let tail = &s[colon + 1..];
    (!tail.contains('/') && !tail.contains('$')).then(|| (&s[..colon], tail))
}

/// Split at the last `separator` when the tail is exactly one variable.
fn split_variable_tag(s: &str, separator: char) -> Option<(&str, &str)> {
    let pos = s.rfind(separator).filter(|&i| i > 0)?;
    let tail = &s[pos + 1..];
    let slash_free = separator != ':' || !tail.contains('/');
    (slash_free && tail.starts_with('$') && count_dollars(tail) == 1).then(|| (&s[..pos], tail))
}

/// Namespace path after a literal registry, with an optional `:tag` or `@digest`.
fn split_namespace_tag(rest: &str) -> (&str, &str) {
    if rest.contains(':') {
        if let Some(colon) = rest.rfind(':').filter(|&i| i > 0) {
            let tail = &rest[colon + 1..];
            if !tail.contains('/') && count_dollars(tail) <= 1 {
                return (&rest[..colon], tail);
            }
        }
    } else if let Some(at) = rest.rfind('@').filter(|&i| i > 0) {
        let tail = &rest[at + 1..];
        if count_dollars(tail) <= 1 {
            return (&rest[..at], tail);
        }
    }
    (rest, "")
}

fn parse_with_variables(link: &str) -> Parts {
    // $IMAGE::$TAG
    if link.contains("::") {
        let halves: Vec<&str> = link.split("::").collect();
        if halves.len() == 2 && count_dollars(halves[0]) == 1 && count_dollars(halves[1]) == 1 {
            return Parts::unknown(halves[0], halves[1]);
        }
    }

    // $REGISTRY//$IMAGE:$TAG
    if link.contains("//") {
        let (name, tag) = split_tag_loose(link).unwrap_or((link, ""));
        return Parts::unknown(&name.replace("//", "/"), tag);
    }

    // /$IMAGE:$TAG
    if let Some(stripped) = link.strip_prefix('/') {
        let (name, tag) = split_tag_loose(stripped).unwrap_or((stripped, ""));
        return Parts::unknown(name, tag);
    }

    // registry.example.com/deep/namespace/$IMAGE:$TAG
    if let Some(slash) = link.find('/').filter(|&i| i > 0) {
        let prefix = &link[..slash];
        if looks_like_registry(prefix) && !prefix.starts_with('$') {
            let (name, tag) = split_namespace_tag(&link[slash + 1..]);
            return Parts::new(prefix, name, tag);
        }
    }

    let tokens = variable_tokens(link);
    match tokens.as_slice() {
        [variable] => parse_one_variable(link, variable),
        [first, second] => parse_two_variables(link, first, second),
        [_, _, _] => parse_three_variables(link),
        [_, _, _, _] => parse_four_variables(link),
        _ => Parts::unknown(link, ""),
    }
}

fn parse_one_variable(link: &str, variable: &str) -> Parts {
    let var_pos = link.find(variable).unwrap_or(0);

    if var_pos > 0 {
        let before = &link[..var_pos];
        let after = &link[var_pos + variable.len()..];

        // registry/image:$TAG or image@$DIGEST
        if before.ends_with(':') || before.ends_with('@') {
            let before_sep = &before[..before.len() - 1];
            let tag = format!("{variable}{after}");
            match before_sep.rfind('/') {
                Some(slash) => {
                    let registry = &before_sep[..slash];
                    if looks_like_registry(registry) {
                        return Parts::new(registry, &before_sep[slash + 1..], &tag);
                    }
                }
                None => return Parts::new(DOCKER_HUB_REGISTRY, before_sep, &tag),
            }
        }

        // registry/$IMAGE:tag or registry/$IMAGE
        if let Some(registry) = before.strip_suffix('/') {
            if looks_like_registry(registry) {
                return match after.strip_prefix(':') {
                    Some(tag) => Parts::new(registry, variable, tag),
                    None => Parts::new(registry, &format!("{variable}{after}"), ""),
                };
            }
        }

        return Parts::unknown(link, "");
    }

    if link.len() == variable.len() {
        return Parts::unknown(variable, "");
    }
    if let Some((name, tag)) = split_literal_tag(link) {
        return Parts::unknown(name, tag);
    }
    Parts::unknown(link, "")
}

fn parse_two_variables(link: &str, first: &str, second: &str) -> Parts {
    let first_start = link.find(first).unwrap_or(0);
    let first_end = first_start + first.len();
    let second_start = link[first_end..]
        .find(second)
        .map_or(first_end, |i| i + first_end);
    let second_end = (second_start + second.len()).min(link.len());

    let before = &link[..first_start];
    let between = &link[first_end..second_start];
    let after = &link[second_end..];

    // Literal registry prefix ending in '/'
    if let Some(registry) = before.strip_suffix('/') {
        if looks_like_registry(registry) {
            if between == ":" && after.is_empty() {
                return Parts::new(registry, first, second);
            }
            if between == "/" {
                if let Some(tag) = after.strip_prefix(':') {
                    return Parts::new(registry, &format!("{first}/{second}"), tag);
                }
                if after.is_empty() {
                    return Parts::new(registry, &format!("{first}/{second}"), "");
                }
            }
            if let Some(path) = between.strip_suffix(':') {
                if after.is_empty() {
                    return Parts::new(registry, &format!("{first}{path}"), second);
                }
            }
        }
    }

    if before.is_empty() {
        match between {
            ":" if after.is_empty() => return Parts::unknown(first, second),
            ":" if after.starts_with('/') => {
                // $REGISTRY:$PORT/image[:tag]
                let remaining = &after[1..];
                let mut fields = remaining.split(':');
                let name = fields.next().unwrap_or_default();
                let tag = fields.next().unwrap_or_default();
                return Parts::new(&format!("{first}:{second}"), name, tag);
            }
            "@" => return Parts::unknown(first, second),
            "" => return Parts::unknown(&format!("{first}{second}"), ""),
            _ => {}
        }
    }

    if let Some(colon) = link.rfind(':').filter(|&i| i > 0) {
        let tail = &link[colon + 1..];
        if !tail.contains('/') && count_dollars(tail) <= 1 {
            return Parts::unknown(&link[..colon], tail);
        }
    }

    Parts::unknown(link, "")
}

fn parse_three_variables(link: &str) -> Parts {
    // $IMAGE:$TAG@$DIGEST
    if let (Some(colon), Some(at)) = (link.find(':'), link.find('@')) {
        if colon < at {
            let name = &link[..colon];
            let tag = &link[colon + 1..at];
            let digest = &link[at + 1..];
            if count_dollars(name) == 1 && count_dollars(tag) == 1 && count_dollars(digest) == 1 {
                return Parts::unknown(name, &format!("{tag}@{digest}"));
            }
        }
    }

    if let Some((name, tag)) = split_variable_tag(link, ':') {
        return Parts::unknown(name, tag);
    }
    if let Some((name, digest)) = split_variable_tag(link, '@') {
        return Parts::unknown(name, digest);
    }

    // $REGISTRY:$PORT/$IMAGE
    if let (Some(colon), Some(slash)) = (link.find(':'), link.find('/')) {
        if colon < slash {
            let registry = &link[..slash];
            let image = &link[slash + 1..];
            if count_dollars(registry) == 2 && count_dollars(image) == 1 {
                return Parts::new(registry, image, "");
            }
        }
    }

    Parts::unknown(link, "")
}

fn parse_four_variables(link: &str) -> Parts {
    // $REGISTRY:$PORT/$IMAGE:$TAG or $REGISTRY:$PORT/$USER/$IMAGE
    if let (Some(colon), Some(slash)) = (link.find(':'), link.find('/')) {
        if colon < slash {
            let registry = &link[..slash];
            let rest = &link[slash + 1..];
            if count_dollars(registry) == 2 {
                if rest.contains(':') {
                    if let Some(c) = rest.rfind(':').filter(|&i| i > 0) {
                        let (image, tag) = (&rest[..c], &rest[c + 1..]);
                        if !tag.contains('/') && count_dollars(image) == 1 && count_dollars(tag) == 1 {
                            return Parts::new(registry, image, tag);
                        }
                    }
                } else if count_dollars(rest) == 2 {
                    return Parts::new(registry, rest, "");
                }
            }
        }
    }

    if let Some((name, tag)) = split_variable_tag(link, ':') {
        return Parts::unknown(name, tag);
    }

    Parts::unknown(link, "")
}
