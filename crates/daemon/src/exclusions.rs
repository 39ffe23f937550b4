//! Exclusion rules and their evaluator.
//!
//! A rule is either a folder prefix or a glob pattern, scoped to one library
//! or global (`library_id = NULL`). Rules gate newly discovered files and are
//! applied retroactively: creating a rule moves matching queued files to
//! excluded, deleting one sends no-longer-matching excluded files back through
//! the classifier.

use crate::classify;
use crate::error::Result;
use crate::probe::MediaProber;
use crate::store::{FileStatus, Store};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::info;

/// How a rule's pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ExclusionKind {
    /// Pattern is a byte-exact path prefix.
    Folder,
    /// Pattern is a glob (`**` path segments, `*`/`?` within a segment),
    /// matched against the full path and the basename.
    Pattern,
}

impl ExclusionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExclusionKind::Folder => "folder",
            ExclusionKind::Pattern => "pattern",
        }
    }
}

/// One stored exclusion rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Exclusion {
    pub id: i64,
    pub library_id: Option<i64>,
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: ExclusionKind,
    pub reason: Option<String>,
    pub created_at: NaiveDateTime,
}

/// A positive evaluation result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExclusionMatch {
    pub rule_id: i64,
    pub reason: String,
}

const DEFAULT_REASON: &str = "Excluded by rule";

impl Exclusion {
    /// The skip reason recorded on files this rule excludes.
    pub fn effective_reason(&self) -> String {
        self.reason
            .clone()
            .unwrap_or_else(|| DEFAULT_REASON.to_string())
    }

    /// Whether this rule applies to the given file. Scope is checked first,
    /// then the pattern.
    pub fn matches(&self, path: &str, library_id: i64) -> bool {
        if let Some(scope) = self.library_id {
            if scope != library_id {
                return false;
            }
        }

        match self.kind {
            ExclusionKind::Folder => path.starts_with(&self.pattern),
            ExclusionKind::Pattern => {
                if glob_match(&self.pattern, path) {
                    return true;
                }
                // Base-match: a bare "*.sample.mkv" should hit regardless of
                // directory depth.
                match path.rsplit('/').next() {
                    Some(basename) => glob_match(&self.pattern, basename),
                    None => false,
                }
            }
        }
    }
}

/// Evaluate a path against a rule set. First match wins; the caller provides
/// the rules in deterministic order (global rules first, then by pattern).
pub fn evaluate(path: &str, library_id: i64, rules: &[Exclusion]) -> Option<ExclusionMatch> {
    rules
        .iter()
        .find(|rule| rule.matches(path, library_id))
        .map(|rule| ExclusionMatch {
            rule_id: rule.id,
            reason: rule.effective_reason(),
        })
}

/// Glob match over path segments.
///
/// `**` matches zero or more whole segments, `*` zero or more non-separator
/// characters, `?` exactly one non-separator character. Everything else is
/// literal.
pub fn glob_match(pattern: &str, path: &str) -> bool {
    let pat: Vec<&str> = pattern.split('/').collect();
    let segs: Vec<&str> = path.split('/').collect();
    match_segments(&pat, &segs)
}

fn match_segments(pat: &[&str], segs: &[&str]) -> bool {
    match pat.first() {
        None => segs.is_empty(),
        Some(&"**") => (0..=segs.len()).any(|i| match_segments(&pat[1..], &segs[i..])),
        Some(first) => {
            !segs.is_empty()
                && match_component(first, segs[0])
                && match_segments(&pat[1..], &segs[1..])
        }
    }
}

/// Wildcard match within one path segment, iterative with `*` backtracking.
fn match_component(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();

    let mut pi = 0;
    let mut ti = 0;
    let mut star: Option<usize> = None;
    let mut mark = 0;

    while ti < t.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == t[ti]) {
            pi += 1;
            ti += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some(pi);
            mark = ti;
            pi += 1;
        } else if let Some(s) = star {
            pi = s + 1;
            mark += 1;
            ti = mark;
        } else {
            return false;
        }
    }

    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// Input for rule creation.
#[derive(Debug, Clone, Deserialize)]
pub struct NewExclusion {
    pub library_id: Option<i64>,
    pub pattern: String,
    #[serde(rename = "type")]
    pub kind: ExclusionKind,
    pub reason: Option<String>,
}

/// Create a rule and retroactively exclude the queued files it covers.
///
/// Only `queued` rows transition; files already encoding or in a terminal
/// state are untouched.
pub async fn create_rule(store: &Store, new: NewExclusion) -> Result<Exclusion> {
    let rule = store.insert_exclusion(&new).await?;

    let queued = store.list_files_with_status(FileStatus::Queued).await?;
    let matching: Vec<i64> = queued
        .iter()
        .filter(|f| rule.matches(&f.file_path, f.library_id))
        .map(|f| f.id)
        .collect();

    if !matching.is_empty() {
        let reason = rule.effective_reason();
        store.mark_files_excluded(&matching, &reason).await?;
        info!(
            rule_id = rule.id,
            count = matching.len(),
            "Exclusion rule retroactively excluded queued files"
        );
    }

    Ok(rule)
}

/// Delete a rule and re-admit excluded files that no remaining rule covers.
///
/// Re-admission goes through the classifier so the size floor and the
/// already-HEVC check still apply.
pub async fn delete_rule(store: &Store, prober: &dyn MediaProber, id: i64) -> Result<()> {
    store.delete_exclusion(id).await?;
    reclassify_released(store, prober).await
}

/// Update a rule in place, then re-evaluate both directions: newly covered
/// queued files become excluded, no-longer-covered excluded files are
/// re-admitted.
pub async fn update_rule(
    store: &Store,
    prober: &dyn MediaProber,
    id: i64,
    new: NewExclusion,
) -> Result<Exclusion> {
    let rule = store.update_exclusion(id, &new).await?;

    let queued = store.list_files_with_status(FileStatus::Queued).await?;
    let matching: Vec<i64> = queued
        .iter()
        .filter(|f| rule.matches(&f.file_path, f.library_id))
        .map(|f| f.id)
        .collect();
    if !matching.is_empty() {
        store
            .mark_files_excluded(&matching, &rule.effective_reason())
            .await?;
    }

    reclassify_released(store, prober).await?;
    Ok(rule)
}

/// Send every excluded file that matches no rule back through the classifier.
async fn reclassify_released(store: &Store, prober: &dyn MediaProber) -> Result<()> {
    let rules = store.list_exclusions().await?;
    let excluded = store.list_files_with_status(FileStatus::Excluded).await?;

    let mut released = 0usize;
    for file in excluded {
        if evaluate(&file.file_path, file.library_id, &rules).is_none() {
            classify::reclassify_excluded(store, prober, &file).await?;
            released += 1;
        }
    }

    if released > 0 {
        info!(count = released, "Re-admitted files after exclusion change");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn folder_rule(id: i64, library_id: Option<i64>, pattern: &str) -> Exclusion {
        Exclusion {
            id,
            library_id,
            pattern: pattern.to_string(),
            kind: ExclusionKind::Folder,
            reason: None,
            created_at: NaiveDateTime::default(),
        }
    }

    fn pattern_rule(id: i64, library_id: Option<i64>, pattern: &str) -> Exclusion {
        Exclusion {
            id,
            library_id,
            pattern: pattern.to_string(),
            kind: ExclusionKind::Pattern,
            reason: None,
            created_at: NaiveDateTime::default(),
        }
    }

    #[test]
    fn test_glob_star_within_segment() {
        assert!(glob_match("/media/*.mkv", "/media/film.mkv"));
        assert!(!glob_match("/media/*.mkv", "/media/sub/film.mkv"));
        assert!(glob_match("/media/f*m.mkv", "/media/film.mkv"));
        assert!(!glob_match("/media/*.mp4", "/media/film.mkv"));
    }

    #[test]
    fn test_glob_question_mark() {
        assert!(glob_match("/m/s0?e01.mkv", "/m/s01e01.mkv"));
        assert!(!glob_match("/m/s0?e01.mkv", "/m/s011e01.mkv"));
        assert!(!glob_match("/m/s0?e01.mkv", "/m/s0/e01.mkv"));
    }

    #[test]
    fn test_glob_double_star_spans_segments() {
        assert!(glob_match("/media/**/*.mkv", "/media/a/b/c/film.mkv"));
        assert!(glob_match("/media/**/*.mkv", "/media/film.mkv"));
        assert!(glob_match("/media/**", "/media/a/b"));
        assert!(glob_match("/**/Extras/*", "/x/y/Extras/trailer.mkv"));
        assert!(!glob_match("/media/**/*.mkv", "/other/film.mkv"));
    }

    #[test]
    fn test_glob_literal_match() {
        assert!(glob_match("/media/film.mkv", "/media/film.mkv"));
        assert!(!glob_match("/media/film.mkv", "/media/film.mk"));
    }

    #[test]
    fn test_pattern_rule_base_match() {
        let rule = pattern_rule(1, None, "*.sample.mkv");
        assert!(rule.matches("/media/m/show/pilot.sample.mkv", 1));
        assert!(!rule.matches("/media/m/show/pilot.mkv", 1));
    }

    #[test]
    fn test_folder_rule_is_byte_prefix() {
        let rule = folder_rule(1, None, "/media/m/Frasier");
        assert!(rule.matches("/media/m/Frasier/s01e01.mkv", 1));
        assert!(rule.matches("/media/m/Frasier.2023/x.mkv", 1)); // prefix, not path-aware
        assert!(!rule.matches("/media/m/Friends/s01e01.mkv", 1));
    }

    #[test]
    fn test_rule_scope() {
        let global = folder_rule(1, None, "/media");
        let scoped = folder_rule(2, Some(7), "/media");

        assert!(global.matches("/media/x.mkv", 1));
        assert!(global.matches("/media/x.mkv", 7));
        assert!(!scoped.matches("/media/x.mkv", 1));
        assert!(scoped.matches("/media/x.mkv", 7));
    }

    #[test]
    fn test_evaluate_first_match_wins() {
        let rules = vec![
            Exclusion {
                reason: Some("global rule".to_string()),
                ..folder_rule(1, None, "/media/m")
            },
            Exclusion {
                reason: Some("scoped rule".to_string()),
                ..folder_rule(2, Some(1), "/media/m")
            },
        ];

        let m = evaluate("/media/m/x.mkv", 1, &rules).expect("should match");
        assert_eq!(m.rule_id, 1);
        assert_eq!(m.reason, "global rule");
    }

    #[test]
    fn test_evaluate_default_reason() {
        let rules = vec![folder_rule(1, None, "/media/m")];
        let m = evaluate("/media/m/x.mkv", 1, &rules).unwrap();
        assert_eq!(m.reason, "Excluded by rule");
    }

    #[test]
    fn test_evaluate_no_match() {
        let rules = vec![
            folder_rule(1, None, "/media/m/Frasier"),
            pattern_rule(2, None, "*.sample.mkv"),
        ];
        assert!(evaluate("/media/m/Friends/s01e01.mkv", 1, &rules).is_none());
    }

    mod retroactivity {
        use super::*;
        use crate::probe::testing::StubProber;
        use crate::store::{FileStatus, NewFile, NewLibrary, Store};

        async fn queued(store: &Store, library_id: i64, path: &str) -> i64 {
            store
                .upsert_file(&NewFile {
                    library_id,
                    file_path: path.to_string(),
                    file_name: path.rsplit('/').next().unwrap().to_string(),
                    original_codec: Some("h264".to_string()),
                    original_bitrate: Some(10_000_000),
                    original_size: Some(5_368_709_120),
                    status: Some(FileStatus::Queued),
                    ..Default::default()
                })
                .await
                .unwrap()
                .id
        }

        #[tokio::test]
        async fn test_rule_creation_and_deletion_are_retroactive() {
            let store = Store::open_in_memory().await.unwrap();
            let prober = StubProber::new();
            let library = store
                .create_library(&NewLibrary {
                    name: "Shows".to_string(),
                    path: "/media/m".to_string(),
                    enabled: true,
                    watch_enabled: false,
                })
                .await
                .unwrap();

            let frasier = queued(&store, library.id, "/media/m/Frasier/s01e01.mkv").await;
            let friends = queued(&store, library.id, "/media/m/Friends/s01e01.mkv").await;

            let rule = create_rule(
                &store,
                NewExclusion {
                    library_id: None,
                    pattern: "/media/m/Frasier".to_string(),
                    kind: ExclusionKind::Folder,
                    reason: None,
                },
            )
            .await
            .unwrap();

            let frasier_row = store.get_file(frasier).await.unwrap();
            assert_eq!(frasier_row.status, FileStatus::Excluded);
            assert_eq!(frasier_row.skip_reason.as_deref(), Some("Excluded by rule"));
            assert_eq!(
                store.get_file(friends).await.unwrap().status,
                FileStatus::Queued
            );

            // Deleting the rule re-admits the excluded file. The stored
            // codec is h264, so no probe is needed and it lands in queued.
            delete_rule(&store, &prober, rule.id).await.unwrap();
            assert_eq!(
                store.get_file(frasier).await.unwrap().status,
                FileStatus::Queued
            );
            assert_eq!(
                store.get_file(friends).await.unwrap().status,
                FileStatus::Queued
            );
            assert_eq!(prober.call_count(), 0);
        }

        #[tokio::test]
        async fn test_pattern_rule_is_retroactive_too() {
            let store = Store::open_in_memory().await.unwrap();
            let library = store
                .create_library(&NewLibrary {
                    name: "Shows".to_string(),
                    path: "/media/m".to_string(),
                    enabled: true,
                    watch_enabled: false,
                })
                .await
                .unwrap();

            let sample = queued(&store, library.id, "/media/m/pilot.sample.mkv").await;
            let keeper = queued(&store, library.id, "/media/m/pilot.mkv").await;

            create_rule(
                &store,
                NewExclusion {
                    library_id: None,
                    pattern: "*.sample.mkv".to_string(),
                    kind: ExclusionKind::Pattern,
                    reason: Some("samples".to_string()),
                },
            )
            .await
            .unwrap();

            assert_eq!(
                store.get_file(sample).await.unwrap().status,
                FileStatus::Excluded
            );
            assert_eq!(
                store.get_file(keeper).await.unwrap().status,
                FileStatus::Queued
            );
        }

        #[tokio::test]
        async fn test_deletion_keeps_files_covered_by_other_rules() {
            let store = Store::open_in_memory().await.unwrap();
            let prober = StubProber::new();
            let library = store
                .create_library(&NewLibrary {
                    name: "Shows".to_string(),
                    path: "/media/m".to_string(),
                    enabled: true,
                    watch_enabled: false,
                })
                .await
                .unwrap();
            let file = queued(&store, library.id, "/media/m/Frasier/s01e01.mkv").await;

            let first = create_rule(
                &store,
                NewExclusion {
                    library_id: None,
                    pattern: "/media/m/Frasier".to_string(),
                    kind: ExclusionKind::Folder,
                    reason: None,
                },
            )
            .await
            .unwrap();
            let _second = create_rule(
                &store,
                NewExclusion {
                    library_id: None,
                    pattern: "**/Frasier/*".to_string(),
                    kind: ExclusionKind::Pattern,
                    reason: None,
                },
            )
            .await
            .unwrap();

            delete_rule(&store, &prober, first.id).await.unwrap();
            assert_eq!(
                store.get_file(file).await.unwrap().status,
                FileStatus::Excluded,
                "still covered by the pattern rule"
            );
        }
    }

    proptest! {
        // A pattern with no wildcards only matches itself.
        #[test]
        fn prop_literal_patterns_match_exactly(
            a in "[a-z0-9]{1,8}",
            b in "[a-z0-9]{1,8}",
        ) {
            let path = format!("/{}/{}.mkv", a, b);
            prop_assert!(glob_match(&path, &path));

            let other = format!("/{}/{}x.mkv", a, b);
            prop_assert!(!glob_match(&path, &other));
        }

        // `*` never crosses a separator.
        #[test]
        fn prop_star_stays_within_segment(
            dir in "[a-z]{1,6}",
            sub in "[a-z]{1,6}",
            name in "[a-z]{1,6}",
        ) {
            let flat = format!("/{}/{}.mkv", dir, name);
            let nested = format!("/{}/{}/{}.mkv", dir, sub, name);
            let pattern = format!("/{}/*.mkv", dir);

            prop_assert!(glob_match(&pattern, &flat));
            prop_assert!(!glob_match(&pattern, &nested));
        }

        // `**` absorbs any number of intermediate segments.
        #[test]
        fn prop_double_star_spans_any_depth(
            root in "[a-z]{1,6}",
            middle in prop::collection::vec("[a-z]{1,6}", 0..4),
            name in "[a-z]{1,6}",
        ) {
            let mut path = format!("/{}", root);
            for seg in &middle {
                path.push('/');
                path.push_str(seg);
            }
            path.push_str(&format!("/{}.mkv", name));

            let pattern = format!("/{}/**/*.mkv", root);
            prop_assert!(glob_match(&pattern, &path));
        }

        // A folder rule matches exactly the paths that start with its pattern.
        #[test]
        fn prop_folder_rule_prefix_semantics(
            prefix in "/[a-z]{1,8}/[a-z]{1,8}",
            rest in "[a-z/]{0,12}",
        ) {
            let rule = folder_rule(1, None, &prefix);
            let matching = format!("{}{}", prefix, rest);
            prop_assert!(rule.matches(&matching, 1));
        }
    }
}
