//! Filesystem post loader (JSON array or JSON Lines)

use async_trait::async_trait;
use post_classifier_domain::{Post, PostSource, PostsError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Preprocessed posts stored in a single file. `.jsonl` files hold one post
/// per line; anything else is a JSON array.
pub struct FsPostSource {
    path: PathBuf,
}

impl FsPostSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn is_json_lines(&self) -> bool {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"))
    }
}

#[async_trait]
impl PostSource for FsPostSource {
    async fn load_posts(&self) -> Result<Vec<Post>, PostsError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let file = self.path.display().to_string();

        let posts = if self.is_json_lines() {
            parse_json_lines(&content, &file)?
        } else {
            serde_json::from_str::<Vec<Post>>(&content).map_err(|e| PostsError::Parse {
                file: file.clone(),
                location: format!("line {} column {}", e.line(), e.column()),
                message: e.to_string(),
            })?
        };

        validate_posts(&posts)?;

        tracing::debug!(file = %file, count = posts.len(), "Loaded posts");
        Ok(posts)
    }
}

fn parse_json_lines(content: &str, file: &str) -> Result<Vec<Post>, PostsError> {
    let mut posts = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let post = serde_json::from_str(line).map_err(|e| PostsError::Parse {
            file: file.to_string(),
            location: format!("line {}", index + 1),
            message: e.to_string(),
        })?;
        posts.push(post);
    }
    Ok(posts)
}

/// Every post needs a non-empty tag set and an id unique within the input
pub fn validate_posts(posts: &[Post]) -> Result<(), PostsError> {
    let mut ids = HashSet::with_capacity(posts.len());
    for post in posts {
        if post.tags.is_empty() {
            return Err(PostsError::EmptyTags {
                post_id: post.id.clone(),
            });
        }
        if !ids.insert(post.id.as_str()) {
            return Err(PostsError::DuplicateId(post.id.clone()));
        }
    }
    Ok(())
}
