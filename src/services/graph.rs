// src/services/graph.rs

//! Graph API comment source.
//!
//! Reads the monitored post and its comments through the Facebook Graph API.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{Author, Comment, CommentPage, Post, SourceConfig};
use crate::services::CommentSource;
use crate::utils::http::{check_status, create_async_client};

const POST_FIELDS: &str = "message,created_time,updated_time,permalink_url";
const COMMENT_FIELDS: &str = "id,created_time,message,from,attachment,parent";

/// Graph API client for one access token.
pub struct GraphApiClient {
    client: Client,
    base_url: Url,
    access_token: String,
    page_size: u32,
}

impl GraphApiClient {
    /// Create a client from the source configuration.
    pub fn from_config(config: &SourceConfig) -> Result<Self> {
        let base_url = Url::parse(&format!(
            "{}/{}/",
            config.base_url.trim_end_matches('/'),
            config.api_version
        ))?;

        Ok(Self {
            client: create_async_client(config)?,
            base_url,
            access_token: config.access_token.clone(),
            page_size: config.page_size,
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        url: Url,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .query(params)
            .query(&[("access_token", self.access_token.as_str())])
            .send()
            .await?;
        let response = check_status(endpoint, response).await?;
        Ok(response.json().await?)
    }
}

#[async_trait]
impl CommentSource for GraphApiClient {
    async fn fetch_post(&self, post_id: &str) -> Result<Post> {
        let url = self.base_url.join(post_id)?;
        let raw: RawPost = self
            .get_json("graph:post", url, &[("fields", POST_FIELDS)])
            .await?;
        raw.into_post()
    }

    async fn fetch_comments_page(
        &self,
        post_id: &str,
        cursor: Option<&str>,
    ) -> Result<CommentPage> {
        let url = self.base_url.join(&format!("{post_id}/comments"))?;
        let limit = self.page_size.to_string();
        let mut params = vec![("fields", COMMENT_FIELDS), ("limit", limit.as_str())];
        if let Some(after) = cursor {
            params.push(("after", after));
        }

        let raw: RawCommentList = self.get_json("graph:comments", url, &params).await?;
        raw.into_page()
    }
}

/// Parse a Graph timestamp (`2025-01-31T18:04:05+0000`).
fn parse_graph_time(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| AppError::validation(format!("Bad Graph timestamp {value:?}: {e}")))
}

fn parse_optional_time(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    value.map(parse_graph_time).transpose()
}

#[derive(Debug, Deserialize)]
struct RawPost {
    id: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    created_time: Option<String>,
    #[serde(default)]
    updated_time: Option<String>,
    #[serde(default)]
    permalink_url: Option<String>,
}

impl RawPost {
    fn into_post(self) -> Result<Post> {
        Ok(Post {
            created_time: parse_optional_time(self.created_time.as_deref())?,
            updated_time: parse_optional_time(self.updated_time.as_deref())?,
            id: self.id,
            message: self.message.unwrap_or_default(),
            permalink_url: self.permalink_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawCommentList {
    #[serde(default)]
    data: Vec<RawComment>,
    #[serde(default)]
    paging: Option<RawPaging>,
}

impl RawCommentList {
    fn into_page(self) -> Result<CommentPage> {
        let items = self
            .data
            .into_iter()
            .map(RawComment::into_comment)
            .collect::<Result<Vec<_>>>()?;

        // The API reports an `after` cursor on the last page too; only a
        // `next` link means another page exists.
        let next_cursor = self.paging.and_then(|paging| {
            paging.next.as_ref()?;
            paging.cursors?.after
        });

        Ok(CommentPage { items, next_cursor })
    }
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    created_time: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    from: Option<RawAuthor>,
    #[serde(default)]
    attachment: Option<RawAttachment>,
    #[serde(default)]
    parent: Option<RawParent>,
}

impl RawComment {
    fn into_comment(self) -> Result<Comment> {
        let author = self
            .from
            .map(|from| Author {
                id: from.id.unwrap_or_else(|| "Unknown".to_string()),
                name: from.name.unwrap_or_else(|| "Unknown".to_string()),
            })
            .unwrap_or_else(Author::unknown);

        let attachment_url = self
            .attachment
            .and_then(|a| a.media)
            .and_then(|m| m.image)
            .map(|i| i.src);

        Ok(Comment {
            created_time: parse_graph_time(&self.created_time)?,
            id: self.id,
            message: self.message.unwrap_or_default(),
            author,
            parent_id: self.parent.map(|p| p.id),
            attachment_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawAttachment {
    #[serde(default)]
    media: Option<RawMedia>,
}

#[derive(Debug, Deserialize)]
struct RawMedia {
    #[serde(default)]
    image: Option<RawImage>,
}

#[derive(Debug, Deserialize)]
struct RawImage {
    src: String,
}

#[derive(Debug, Deserialize)]
struct RawParent {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RawPaging {
    #[serde(default)]
    cursors: Option<RawCursors>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawCursors {
    #[serde(default)]
    after: Option<String>,
}
