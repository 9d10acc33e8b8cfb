use std::collections::BTreeSet;

use crate::engine::EngineClient;
use crate::manifest::Manifest;
use crate::structs::{compare_tags, ImageName};
use crate::Result;

/// Remove old image revisions for the repositories a pod uses
///
/// For every `(registry, repository)` referenced by the manifest the
/// locally present tags are ordered (numeric versions newest-first, then
/// lexicographic tags) and all but the `keep` newest are removed. Tags
/// referenced by a currently existing pod container are always spared;
/// untagged images are not touched.
///
/// Returns the removed references. Under `dry_run` nothing is removed.
pub fn clean(
    engine: &dyn EngineClient,
    mf: &Manifest,
    keep: usize,
    dry_run: bool,
) -> Result<Vec<ImageName>> {
    // tags pinned by running containers of this pod
    let mut in_use: BTreeSet<String> = BTreeSet::new();
    for o in engine.list(&mf.namespace)? {
        if !o.running {
            continue;
        }
        in_use.insert(o.image.clone());
        if let Ok(img) = ImageName::parse(&o.image) {
            in_use.insert(img.canonical());
        }
    }

    let mut repos: BTreeSet<(Option<String>, String)> = BTreeSet::new();
    for img in mf.images() {
        repos.insert((img.registry.clone(), img.repository.clone()));
    }

    let mut removed = vec![];
    for (registry, repository) in repos {
        let probe = ImageName {
            registry: registry.clone(),
            repository: repository.clone(),
            tag: None,
        };
        let mut tags = engine.list_tags(registry.as_deref(), &repository)?;
        tags.sort_by(|a, b| compare_tags(a, b));
        tags.reverse();
        debug!("{}: {} local tags", probe.repo(), tags.len());

        for tag in tags.iter().skip(keep) {
            let img = probe.with_tag(tag);
            if in_use.contains(&img.canonical()) || in_use.contains(&img.to_string()) {
                debug!("Sparing {} (in use)", img);
                continue;
            }
            info!("Removing old image {}", img);
            if !dry_run {
                engine.remove_image(&img)?;
            }
            removed.push(img);
        }
    }
    Ok(removed)
}
