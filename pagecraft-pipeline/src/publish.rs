//! Publication engine: recreate the round's repository and land the whole
//! bundle in a single commit.
//!
//! Files are never written one by one. Blobs are uploaded in parallel, then
//! one tree and one commit on top of the initial commit, then the branch ref
//! moves. Anyone watching the repository sees either the empty initial
//! commit or the complete bundle.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use futures::future::try_join_all;
use serde::Serialize;

use crate::bundle::{ArtifactBundle, FileContent};
use crate::error::{HostingError, PublishError};
use crate::hosting::{BlobEncoding, HostingApi, PagesStatus, TreeEntry};

pub const DEFAULT_BRANCH: &str = "main";

/// Where a bundle ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublicationResult {
    pub repo_url: String,
    pub commit_sha: String,
    pub pages_url: String,
}

/// Public Pages URL for a repository.
pub fn pages_url(owner: &str, repo: &str) -> String {
    format!("https://{owner}.github.io/{repo}/")
}

trait StepExt<T> {
    fn step(self, step: &'static str) -> Result<T, PublishError>;
}

impl<T> StepExt<T> for Result<T, HostingError> {
    fn step(self, step: &'static str) -> Result<T, PublishError> {
        self.map_err(|source| PublishError { step, source })
    }
}

/// Publishes bundles through a hosting API.
#[derive(Clone)]
pub struct Publisher {
    hosting: Arc<dyn HostingApi>,
    settle_delay: Duration,
}

impl Publisher {
    pub fn new(hosting: Arc<dyn HostingApi>, settle_delay: Duration) -> Self {
        Self {
            hosting,
            settle_delay,
        }
    }

    /// Recreate `{task}-round{round}` and commit `bundle` to it.
    pub async fn publish(
        &self,
        task: &str,
        round: u32,
        bundle: &ArtifactBundle,
    ) -> Result<PublicationResult, PublishError> {
        let hosting = &self.hosting;
        let repo = format!("{task}-round{round}");

        let owner = hosting
            .authenticated_login()
            .await
            .step("resolving token owner")?;
        tracing::info!(%owner, %repo, "Creating repository");

        if hosting
            .delete_repo(&owner, &repo)
            .await
            .step("deleting previous repository")?
        {
            tracing::info!(%repo, "Deleted existing repository");
        } else {
            tracing::debug!(%repo, "No existing repository to delete");
        }

        let created = hosting
            .create_repo(&repo, &format!("Generated application for {task} - Round {round}"))
            .await
            .step("creating repository")?;
        tracing::info!(url = %created.html_url, "Repository created");

        // The initial commit is not always readable the moment creation returns.
        tokio::time::sleep(self.settle_delay).await;

        let base = hosting
            .branch_tip(&owner, &repo, DEFAULT_BRANCH)
            .await
            .step("reading initial commit")?;

        let files = bundle.files();
        let uploads = files.iter().map(|file| {
            let (content, encoding) = match &file.content {
                FileContent::Text(text) => (text.clone(), BlobEncoding::Utf8),
                FileContent::Binary(bytes) => (
                    base64::engine::general_purpose::STANDARD.encode(bytes),
                    BlobEncoding::Base64,
                ),
            };
            let (owner, repo) = (&owner, &repo);
            async move {
                let sha = hosting.create_blob(owner, repo, &content, encoding).await?;
                Ok::<_, HostingError>(TreeEntry::file(file.path.clone(), sha))
            }
        });
        let entries = try_join_all(uploads).await.step("uploading blobs")?;
        tracing::debug!(count = entries.len(), "Uploaded blobs");

        let tree = hosting
            .create_tree(&owner, &repo, &base, &entries)
            .await
            .step("creating tree")?;

        let commit_sha = hosting
            .create_commit(
                &owner,
                &repo,
                &format!("Deploy {task} round {round}"),
                &tree,
                std::slice::from_ref(&base),
            )
            .await
            .step("creating commit")?;
        tracing::info!(%commit_sha, "New commit created");

        hosting
            .update_ref(&owner, &repo, DEFAULT_BRANCH, &commit_sha)
            .await
            .step("updating branch")?;
        tracing::info!(branch = DEFAULT_BRANCH, "Pushed commit");

        match hosting.enable_pages(&owner, &repo, DEFAULT_BRANCH, "/").await {
            Ok(PagesStatus::Enabled) => tracing::info!("Pages enabled"),
            Ok(PagesStatus::AlreadyEnabled) => tracing::info!("Pages already enabled"),
            Err(e) => tracing::warn!(error = %e, "Could not enable Pages, continuing"),
        }

        let pages_url = pages_url(&owner, &repo);
        tracing::info!(%pages_url, "Publication complete");

        Ok(PublicationResult {
            repo_url: created.html_url,
            commit_sha,
            pages_url,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::hosting::CreatedRepo;
    use crate::request::Attachment;
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Records every call; individual operations can be made to fail.
    #[derive(Default)]
    pub(crate) struct FakeHosting {
        pub(crate) calls: Mutex<Vec<String>>,
        pub(crate) blobs: Mutex<Vec<(String, BlobEncoding)>>,
        pub(crate) trees: Mutex<Vec<Vec<TreeEntry>>>,
        pub(crate) commits: Mutex<Vec<(String, Vec<String>)>>,
        pub(crate) previous_page: Mutex<Option<String>>,
        pub(crate) repo_exists: bool,
        pub(crate) fail_on: Option<&'static str>,
        pub(crate) pages_error: bool,
    }

    impl FakeHosting {
        fn record(&self, call: String) -> Result<(), HostingError> {
            let op = call.split(' ').next().unwrap_or_default().to_string();
            self.calls.lock().push(call);
            match self.fail_on {
                Some(failing) if failing == op => Err(HostingError::Api {
                    operation: "fake",
                    status: 500,
                    message: format!("{op} exploded"),
                }),
                _ => Ok(()),
            }
        }

        pub(crate) fn ops(&self) -> Vec<String> {
            self.calls
                .lock()
                .iter()
                .map(|c| c.split(' ').next().unwrap_or_default().to_string())
                .collect()
        }
    }

    #[async_trait]
    impl HostingApi for FakeHosting {
        async fn authenticated_login(&self) -> Result<String, HostingError> {
            self.record("login".to_string())?;
            Ok("octocat".to_string())
        }

        async fn delete_repo(&self, owner: &str, name: &str) -> Result<bool, HostingError> {
            self.record(format!("delete {owner}/{name}"))?;
            Ok(self.repo_exists)
        }

        async fn create_repo(&self, name: &str, _description: &str) -> Result<CreatedRepo, HostingError> {
            self.record(format!("create {name}"))?;
            Ok(CreatedRepo {
                html_url: format!("https://github.com/octocat/{name}"),
            })
        }

        async fn branch_tip(&self, owner: &str, name: &str, branch: &str) -> Result<String, HostingError> {
            self.record(format!("tip {owner}/{name}@{branch}"))?;
            Ok("base0".to_string())
        }

        async fn create_blob(
            &self,
            _owner: &str,
            _name: &str,
            content: &str,
            encoding: BlobEncoding,
        ) -> Result<String, HostingError> {
            self.record("blob".to_string())?;
            let mut blobs = self.blobs.lock();
            blobs.push((content.to_string(), encoding));
            Ok(format!("blob{}", blobs.len()))
        }

        async fn create_tree(
            &self,
            _owner: &str,
            _name: &str,
            base_tree: &str,
            entries: &[TreeEntry],
        ) -> Result<String, HostingError> {
            self.record(format!("tree {base_tree}"))?;
            self.trees.lock().push(entries.to_vec());
            Ok("tree1".to_string())
        }

        async fn create_commit(
            &self,
            _owner: &str,
            _name: &str,
            message: &str,
            tree: &str,
            parents: &[String],
        ) -> Result<String, HostingError> {
            self.record(format!("commit {tree}"))?;
            self.commits.lock().push((message.to_string(), parents.to_vec()));
            Ok("commit1".to_string())
        }

        async fn update_ref(&self, _owner: &str, _name: &str, branch: &str, sha: &str) -> Result<(), HostingError> {
            self.record(format!("ref {branch}={sha}"))
        }

        async fn enable_pages(&self, _owner: &str, _name: &str, _branch: &str, _path: &str) -> Result<PagesStatus, HostingError> {
            self.record("pages".to_string())?;
            if self.pages_error {
                return Err(HostingError::Api {
                    operation: "enable pages",
                    status: 422,
                    message: "nope".to_string(),
                });
            }
            Ok(PagesStatus::Enabled)
        }

        async fn file_content(&self, owner: &str, name: &str, path: &str) -> Result<String, HostingError> {
            self.record(format!("read {owner}/{name}/{path}"))?;
            Ok(self.previous_page.lock().clone().unwrap_or_default())
        }
    }

    fn bundle_with(attachments: usize) -> ArtifactBundle {
        let mut bundle = crate::bundle::parse_generated(crate::bundle::tests::WELL_FORMED);
        bundle.attachments = (0..attachments)
            .map(|i| Attachment {
                name: format!("data{i}.csv"),
                bytes: vec![b'a', b',', b'b'],
            })
            .collect();
        bundle
    }

    #[tokio::test(start_paused = true)]
    async fn one_commit_with_every_file_and_attachment() {
        let hosting = Arc::new(FakeHosting::default());
        let publisher = Publisher::new(hosting.clone(), Duration::from_secs(2));

        let result = publisher.publish("demo", 1, &bundle_with(2)).await.unwrap();

        assert_eq!(
            result,
            PublicationResult {
                repo_url: "https://github.com/octocat/demo-round1".to_string(),
                commit_sha: "commit1".to_string(),
                pages_url: "https://octocat.github.io/demo-round1/".to_string(),
            }
        );

        let commits = hosting.commits.lock();
        assert_eq!(commits.len(), 1);
        assert_eq!(commits[0].0, "Deploy demo round 1");
        assert_eq!(commits[0].1, vec!["base0".to_string()]);

        let trees = hosting.trees.lock();
        assert_eq!(trees.len(), 1);
        let mut paths: Vec<_> = trees[0].iter().map(|e| e.path.as_str()).collect();
        paths.sort_unstable();
        assert_eq!(paths, ["LICENSE", "README.md", "data0.csv", "data1.csv", "index.html"]);
        assert!(trees[0].iter().all(|e| e.mode == "100644" && e.kind == "blob"));
    }

    #[tokio::test(start_paused = true)]
    async fn steps_run_in_order() {
        let hosting = Arc::new(FakeHosting::default());
        Publisher::new(hosting.clone(), Duration::from_secs(2))
            .publish("demo", 1, &bundle_with(0))
            .await
            .unwrap();

        assert_eq!(
            hosting.ops(),
            [
                "login", "delete", "create", "tip", "blob", "blob", "blob", "tree", "commit",
                "ref", "pages"
            ]
        );
        assert!(hosting.calls.lock().contains(&"ref main=commit1".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn attachments_are_uploaded_as_base64() {
        let hosting = Arc::new(FakeHosting::default());
        Publisher::new(hosting.clone(), Duration::ZERO)
            .publish("demo", 1, &bundle_with(1))
            .await
            .unwrap();

        let blobs = hosting.blobs.lock();
        let encodings: Vec<_> = blobs.iter().map(|(_, e)| *e).collect();
        assert_eq!(encodings.iter().filter(|e| **e == BlobEncoding::Utf8).count(), 3);
        assert!(blobs.contains(&("YSxi".to_string(), BlobEncoding::Base64)));
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_settle_delay_before_reading_tip() {
        let hosting = Arc::new(FakeHosting::default());
        let start = tokio::time::Instant::now();
        Publisher::new(hosting, Duration::from_secs(2))
            .publish("demo", 1, &bundle_with(0))
            .await
            .unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn pages_failure_is_not_fatal() {
        let hosting = Arc::new(FakeHosting {
            pages_error: true,
            ..Default::default()
        });
        let result = Publisher::new(hosting, Duration::ZERO)
            .publish("demo", 1, &bundle_with(0))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_step_aborts_with_its_name() {
        for (op, step) in [
            ("login", "resolving token owner"),
            ("delete", "deleting previous repository"),
            ("create", "creating repository"),
            ("blob", "uploading blobs"),
            ("commit", "creating commit"),
            ("ref", "updating branch"),
        ] {
            let hosting = Arc::new(FakeHosting {
                fail_on: Some(op),
                ..Default::default()
            });
            let err = Publisher::new(hosting.clone(), Duration::ZERO)
                .publish("demo", 1, &bundle_with(0))
                .await
                .unwrap_err();
            assert_eq!(err.step, step);
            assert!(!hosting.ops().contains(&"pages".to_string()), "{op} must abort");
        }
    }
}
