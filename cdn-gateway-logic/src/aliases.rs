//! Transitive resolution of CDN path aliases (e.g. RHUI paths aliased to
//! their non-RHUI equivalents).

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Alias {
    pub src: String,
    pub dest: String,
    #[serde(default)]
    pub exclude_paths: Vec<String>,
}

/// Resolve every alias applying to `uri`.
///
/// Multiple passes are made so that nested aliases resolve regardless of the
/// order in which they are listed. An alias already applied in an earlier
/// pass is never applied again, which keeps cyclic inputs from recursing.
pub fn resolve<'a>(uri: &str, aliases: &'a [Alias]) -> String {
    let mut uri = uri.to_string();
    let mut remaining: Vec<&'a Alias> = aliases.iter().collect();

    loop {
        let mut processed = Vec::new();

        for (idx, alias) in remaining.iter().enumerate() {
            if uri == alias.src || uri.starts_with(&format!("{}/", alias.src)) {
                let new_uri = uri.replacen(&alias.src, &alias.dest, 1);
                tracing::debug!(src = %uri, dest = %new_uri, "resolved alias");
                uri = new_uri;
                processed.push(idx);
            }
        }

        if processed.is_empty() {
            break;
        }

        let mut idx = 0;
        remaining.retain(|_| {
            let keep = !processed.contains(&idx);
            idx += 1;
            keep
        });
    }

    uri
}

/// Resolve a whole set of uris, returning only those that changed.
pub fn resolve_all<I>(uris: I, aliases: &[Alias]) -> Vec<String>
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    uris.into_iter()
        .filter_map(|uri| {
            let resolved = resolve(uri.as_ref(), aliases);
            (resolved != uri.as_ref()).then_some(resolved)
        })
        .collect()
}
