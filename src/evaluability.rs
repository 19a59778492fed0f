//! Classifies a request before any rule evaluation: can the whole thing be
//! decided from the current artifact, and if not, which names need the
//! remote service.

use crate::artifact::RuleArtifact;
use crate::delivery::DeliveryRequest;
use std::collections::BTreeSet;

/// Verdict produced once per request. `remote_mboxes`/`remote_views` are
/// only populated for a partial verdict with a loaded artifact.
#[derive(Debug, Clone, Default)]
pub struct LocalExecutionVerdict {
    pub all_local: bool,
    pub reason: Option<String>,
    pub global_mbox: Option<String>,
    pub remote_mboxes: Vec<String>,
    pub remote_views: Vec<String>,
}

impl LocalExecutionVerdict {
    fn not_local(reason: &str) -> Self {
        LocalExecutionVerdict {
            all_local: false,
            reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

/// A name is local-resolvable iff the artifact lists it locally AND not
/// remotely; a name in both inventories is ambiguous and always routed
/// remote, as are names the artifact has never heard of.
pub fn evaluate_local_execution(
    request: &DeliveryRequest,
    artifact: Option<&RuleArtifact>,
) -> LocalExecutionVerdict {
    let Some(artifact) = artifact else {
        return LocalExecutionVerdict::not_local("Rule artifact not yet available");
    };

    let mut remote_mboxes = BTreeSet::new();
    let mut remote_views = BTreeSet::new();
    let mut all_views_requested = false;

    let mut check_mbox = |name: &str| {
        let local_only =
            artifact.local_mboxes.contains(name) && !artifact.remote_mboxes.contains(name);
        if !local_only {
            remote_mboxes.insert(name.to_string());
        }
    };

    if let Some(prefetch) = &request.prefetch {
        for mbox in &prefetch.mboxes {
            check_mbox(&mbox.name);
        }
        if prefetch.page_load.is_some() {
            check_mbox(&artifact.global_mbox);
        }
        for view in &prefetch.views {
            match view.name.as_deref() {
                Some(name) => {
                    let local_only = artifact.local_views.contains(name)
                        && !artifact.remote_views.contains(name);
                    if !local_only {
                        remote_views.insert(name.to_string());
                    }
                }
                None => all_views_requested = true,
            }
        }
    }
    if let Some(execute) = &request.execute {
        for mbox in &execute.mboxes {
            check_mbox(&mbox.name);
        }
        if execute.page_load.is_some() {
            check_mbox(&artifact.global_mbox);
        }
    }

    if all_views_requested {
        remote_views.extend(artifact.remote_views.iter().cloned());
    }

    let all_local = remote_mboxes.is_empty() && remote_views.is_empty();
    LocalExecutionVerdict {
        all_local,
        reason: (!all_local)
            .then(|| "Some requested names require the remote service".to_string()),
        global_mbox: Some(artifact.global_mbox.clone()),
        remote_mboxes: remote_mboxes.into_iter().collect(),
        remote_views: remote_views.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::{ExecuteRequest, MboxRequest, PrefetchRequest, ViewRequest};

    fn artifact() -> RuleArtifact {
        RuleArtifact {
            version: "1.0.0".to_string(),
            global_mbox: "overall-mbox".to_string(),
            local_mboxes: ["a", "b"].iter().map(|s| s.to_string()).collect(),
            remote_mboxes: ["b"].iter().map(|s| s.to_string()).collect(),
            local_views: ["home", "plp"].iter().map(|s| s.to_string()).collect(),
            remote_views: ["plp", "checkout"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn mbox(name: &str) -> MboxRequest {
        MboxRequest {
            name: name.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_artifact() {
        let verdict = evaluate_local_execution(&DeliveryRequest::default(), None);
        assert!(!verdict.all_local);
        assert!(verdict.reason.is_some());
        assert!(verdict.remote_mboxes.is_empty());
        assert!(verdict.remote_views.is_empty());
    }

    #[test]
    fn test_classification_partition() {
        let request = DeliveryRequest {
            execute: Some(ExecuteRequest {
                mboxes: vec![mbox("a"), mbox("b"), mbox("c")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let verdict = evaluate_local_execution(&request, Some(&artifact()));
        assert!(!verdict.all_local);
        // b is ambiguous (known both locally and remotely), c is unknown.
        assert_eq!(verdict.remote_mboxes, vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_all_local() {
        let request = DeliveryRequest {
            execute: Some(ExecuteRequest {
                mboxes: vec![mbox("a")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let verdict = evaluate_local_execution(&request, Some(&artifact()));
        assert!(verdict.all_local);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn test_page_load_counts_as_global_mbox() {
        // The artifact above does not list its own global mbox locally, so a
        // page-load request cannot be fully local.
        let request = DeliveryRequest {
            execute: Some(ExecuteRequest {
                page_load: Some(Default::default()),
                ..Default::default()
            }),
            ..Default::default()
        };
        let verdict = evaluate_local_execution(&request, Some(&artifact()));
        assert!(!verdict.all_local);
        assert_eq!(verdict.remote_mboxes, vec!["overall-mbox".to_string()]);
    }

    #[test]
    fn test_view_wildcard_pulls_whole_remote_inventory() {
        let request = DeliveryRequest {
            prefetch: Some(PrefetchRequest {
                views: vec![ViewRequest::default()],
                ..Default::default()
            }),
            ..Default::default()
        };
        let verdict = evaluate_local_execution(&request, Some(&artifact()));
        assert!(!verdict.all_local);
        assert_eq!(
            verdict.remote_views,
            vec!["checkout".to_string(), "plp".to_string()]
        );
    }

    #[test]
    fn test_named_views() {
        let named = |name: &str| ViewRequest {
            name: Some(name.to_string()),
            ..Default::default()
        };
        let request = DeliveryRequest {
            prefetch: Some(PrefetchRequest {
                views: vec![named("home"), named("plp")],
                ..Default::default()
            }),
            ..Default::default()
        };
        let verdict = evaluate_local_execution(&request, Some(&artifact()));
        // home is local-only; plp is ambiguous.
        assert_eq!(verdict.remote_views, vec!["plp".to_string()]);
    }
}
