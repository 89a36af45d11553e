use crate::api::{is_removed_body, MAX_PAGE_SIZE};
use crate::{CommentListing, PostPage, RawComment, RedditPostData, RedditSource};
use std::collections::HashMap;
use threadscope_core::{
    CollectionLimits, CommentRecord, ConceptConfig, ConfigError, CoreError, ErrorExt, QueryOrigin,
    ThreadRecord,
};
use tracing::{debug, info, warn};

/// Reddit caps a single comment listing at this many comments.
const MAX_COMMENT_FETCH: usize = 500;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionStats {
    pub queries_run: usize,
    pub query_failures: usize,
    pub posts_seen: usize,
    pub duplicates_merged: usize,
    pub removed_skipped: usize,
    pub comment_failures: usize,
    pub more_expansions: usize,
    pub comments_kept: usize,
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub threads: Vec<ThreadRecord>,
    pub stats: CollectionStats,
}

/// Gathers candidate threads for a concept: keyword searches and top
/// listings per subreddit, merged by post id, each with a bounded comment tree.
pub struct ThreadCollector<S> {
    source: S,
    limits: CollectionLimits,
}

impl<S: RedditSource> ThreadCollector<S> {
    pub fn new(source: S, limits: CollectionLimits) -> Self {
        Self { source, limits }
    }

    pub async fn collect(&self, concept: &ConceptConfig) -> Result<Collection, CoreError> {
        self.limits.validate()?;
        let subreddits: Vec<&str> = concept
            .target_subreddits
            .iter()
            .map(|s| s.trim().trim_start_matches("r/"))
            .filter(|s| !s.is_empty())
            .collect();
        if subreddits.is_empty() {
            return Err(ConfigError::MissingField {
                field: "target_subreddits".to_string(),
            }
            .into());
        }

        let mut stats = CollectionStats::default();
        let mut threads: Vec<ThreadRecord> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for subreddit in &subreddits {
            for keyword in &concept.keywords {
                info!("Searching for '{}' in r/{}", keyword, subreddit);
                let origin = QueryOrigin::Keyword {
                    subreddit: subreddit.to_string(),
                    keyword: keyword.clone(),
                };
                let posts = self
                    .run_query(&origin, self.limits.post_limit_per_query, &mut stats)
                    .await?;
                merge_posts(posts, origin, &mut threads, &mut index, &mut stats);
            }

            for time_filter in &self.limits.top_time_filters {
                info!("Fetching top posts ({}) from r/{}", time_filter, subreddit);
                let origin = QueryOrigin::Top {
                    subreddit: subreddit.to_string(),
                    time_filter: time_filter.clone(),
                };
                let posts = self
                    .run_query(&origin, self.limits.top_posts_count, &mut stats)
                    .await?;
                merge_posts(posts, origin, &mut threads, &mut index, &mut stats);
            }
        }

        info!(
            "Found {} distinct posts across {} queries, fetching comments",
            threads.len(),
            stats.queries_run
        );

        for (position, thread) in threads.iter_mut().enumerate() {
            debug!(
                "Fetching comments for {} ({}/{})",
                thread.id,
                position + 1,
                index.len()
            );
            match self.fetch_comment_tree(&thread.id, &mut stats).await {
                Ok(comments) => {
                    stats.comments_kept += comments.iter().map(CommentRecord::subtree_len).sum::<usize>();
                    thread.comments = comments;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to fetch comments for post {}: {}", thread.id, e);
                    stats.comment_failures += 1;
                }
            }
        }

        info!(
            "Collection finished: {} threads, {} comments kept, {} duplicates merged, {} removed posts skipped, {} query failures, {} comment failures",
            threads.len(),
            stats.comments_kept,
            stats.duplicates_merged,
            stats.removed_skipped,
            stats.query_failures,
            stats.comment_failures
        );

        Ok(Collection { threads, stats })
    }

    /// Runs one paged query. Non-fatal failures are logged and yield
    /// whatever pages were already fetched.
    async fn run_query(
        &self,
        origin: &QueryOrigin,
        limit: usize,
        stats: &mut CollectionStats,
    ) -> Result<Vec<RedditPostData>, CoreError> {
        stats.queries_run += 1;
        let mut posts = Vec::new();
        let mut after: Option<String> = None;

        while posts.len() < limit {
            let page_size = (limit - posts.len()).min(MAX_PAGE_SIZE);
            let page = match self.fetch_page(origin, page_size, after.as_deref()).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Query {} failed: {}", origin, e);
                    stats.query_failures += 1;
                    break;
                }
            };

            let PostPage {
                posts: page_posts,
                after: next,
            } = page;
            if page_posts.is_empty() {
                break;
            }
            posts.extend(page_posts);
            match next {
                Some(next) => after = Some(next),
                None => break,
            }
        }

        posts.truncate(limit);
        debug!("Query {} returned {} posts", origin, posts.len());
        Ok(posts)
    }

    async fn fetch_page(
        &self,
        origin: &QueryOrigin,
        page_size: usize,
        after: Option<&str>,
    ) -> Result<PostPage, CoreError> {
        match origin {
            QueryOrigin::Keyword { subreddit, keyword } => {
                self.source
                    .search_posts(subreddit, keyword, page_size, after)
                    .await
            }
            QueryOrigin::Top {
                subreddit,
                time_filter,
            } => {
                self.source
                    .top_posts(subreddit, time_filter, page_size, after)
                    .await
            }
        }
    }

    async fn fetch_comment_tree(
        &self,
        post_id: &str,
        stats: &mut CollectionStats,
    ) -> Result<Vec<CommentRecord>, CoreError> {
        let fetch_limit = (self.limits.comment_limit_per_post
            * (self.limits.max_replies_per_comment + 1))
            .min(MAX_COMMENT_FETCH);
        let CommentListing {
            mut comments,
            more_top_level,
        } = self
            .source
            .comments(post_id, fetch_limit, self.limits.reply_fetch_depth + 1)
            .await?;

        let mut pending = more_top_level.as_slice();
        let mut expansions = 0;
        while !pending.is_empty() && expansions < self.limits.more_comments_limit {
            let take = pending.len().min(MAX_PAGE_SIZE);
            let (batch, rest) = pending.split_at(take);
            match self.source.more_children(post_id, batch).await {
                Ok(extra) => comments.extend(extra),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Failed to expand more comments for post {}: {}", post_id, e);
                    break;
                }
            }
            stats.more_expansions += 1;
            expansions += 1;
            pending = rest;
        }

        Ok(build_bounded_tree(post_id, comments, &self.limits))
    }
}

fn merge_posts(
    posts: Vec<RedditPostData>,
    origin: QueryOrigin,
    threads: &mut Vec<ThreadRecord>,
    index: &mut HashMap<String, usize>,
    stats: &mut CollectionStats,
) {
    for post in posts {
        stats.posts_seen += 1;
        if let Some(&position) = index.get(&post.id) {
            threads[position].add_origin(origin.clone());
            stats.duplicates_merged += 1;
            continue;
        }
        if post.is_removed() {
            debug!("Skipping removed post {} from {}", post.id, origin);
            stats.removed_skipped += 1;
            continue;
        }

        index.insert(post.id.clone(), threads.len());
        threads.push(ThreadRecord {
            permalink: post.full_permalink(),
            id: post.id,
            title: post.title,
            selftext: post.selftext,
            url: post.url,
            subreddit: post.subreddit,
            author: post.author,
            score: post.score,
            num_comments: post.num_comments,
            created_utc: post.created_utc,
            query_origins: vec![origin.clone()],
            comments: Vec::new(),
        });
    }
}

struct Node {
    comment: RawComment,
    children: Vec<usize>,
}

/// Builds the bounded comment tree from a flat listing.
///
/// Siblings are ranked by score (ties keep listing order), the top
/// `comment_limit_per_post` roots and `max_replies_per_comment` replies per
/// parent are kept, and nothing deeper than `reply_fetch_depth` survives.
/// Deleted or removed comments are dropped together with their replies.
pub fn build_bounded_tree(
    post_id: &str,
    comments: Vec<RawComment>,
    limits: &CollectionLimits,
) -> Vec<CommentRecord> {
    let post_fullname = format!("t3_{}", post_id);
    let mut nodes: Vec<Node> = Vec::with_capacity(comments.len());
    let mut by_id: HashMap<String, usize> = HashMap::with_capacity(comments.len());
    let mut roots: Vec<usize> = Vec::new();

    for comment in comments {
        if by_id.contains_key(&comment.id) {
            continue;
        }
        let parent = if comment.parent_id == post_fullname {
            None
        } else {
            match comment
                .parent_id
                .strip_prefix("t1_")
                .and_then(|id| by_id.get(id))
            {
                Some(&parent) => Some(parent),
                None => {
                    debug!("Dropping orphan comment {} on {}", comment.id, post_id);
                    continue;
                }
            }
        };

        let position = nodes.len();
        by_id.insert(comment.id.clone(), position);
        nodes.push(Node {
            comment,
            children: Vec::new(),
        });
        match parent {
            Some(parent) => nodes[parent].children.push(position),
            None => roots.push(position),
        }
    }

    let rank = |ids: &[usize], keep: usize| -> Vec<usize> {
        let mut ranked: Vec<usize> = ids
            .iter()
            .copied()
            .filter(|&i| !is_removed_body(&nodes[i].comment.body))
            .collect();
        ranked.sort_by(|&a, &b| nodes[b].comment.score.cmp(&nodes[a].comment.score));
        ranked.truncate(keep);
        ranked
    };

    // Pre-order selection: (node, parent slot in `selected`, depth).
    let mut selected: Vec<(usize, Option<usize>, u32)> = Vec::new();
    let mut stack: Vec<(usize, Option<usize>, u32)> = rank(&roots, limits.comment_limit_per_post)
        .into_iter()
        .rev()
        .map(|node| (node, None, 0))
        .collect();

    while let Some((node, parent, depth)) = stack.pop() {
        let slot = selected.len();
        selected.push((node, parent, depth));
        if depth < limits.reply_fetch_depth {
            let replies = rank(&nodes[node].children, limits.max_replies_per_comment);
            stack.extend(replies.into_iter().rev().map(|child| (child, Some(slot), depth + 1)));
        }
    }

    // Assemble bottom-up: descendants always follow their ancestor in `selected`.
    let mut records: Vec<Option<CommentRecord>> = selected
        .iter()
        .map(|&(node, _, depth)| {
            let raw = &nodes[node].comment;
            Some(CommentRecord {
                id: raw.id.clone(),
                body: raw.body.clone(),
                author: raw.author.clone(),
                score: raw.score,
                created_utc: raw.created_utc,
                depth,
                replies: Vec::new(),
            })
        })
        .collect();

    let mut tree: Vec<CommentRecord> = Vec::new();
    for slot in (0..selected.len()).rev() {
        let Some(record) = records[slot].take() else {
            continue;
        };
        match selected[slot].1 {
            Some(parent) => {
                if let Some(parent_record) = records[parent].as_mut() {
                    parent_record.replies.insert(0, record);
                }
            }
            None => tree.insert(0, record),
        }
    }

    tree
}
