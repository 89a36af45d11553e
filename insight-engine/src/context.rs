//! Prompt context for a single thread.

use threadscope_core::text::{estimate_token_count, markdown_to_plain_text, truncate_chars};
use threadscope_core::{CommentRecord, ThreadRecord};

const NO_BODY: &str = "[no body]";
const TRUNCATION_MARK: &str = " [truncated]";

/// Rendered thread context plus what had to be left out to fit the budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadContext {
    pub text: String,
    pub comments_total: usize,
    pub comments_included: usize,
    pub body_truncated: bool,
}

impl ThreadContext {
    pub fn estimated_tokens(&self) -> usize {
        estimate_token_count(&self.text)
    }
}

/// Caps the title at half of the character budget.
fn bounded_title(title: &str, max_tokens: usize) -> String {
    let title = title.trim();
    let limit = max_tokens.saturating_mul(2);
    if title.chars().count() > limit {
        format!("{}{}", truncate_chars(title, limit), TRUNCATION_MARK)
    } else {
        title.to_string()
    }
}

/// Title and body only, for the relevance filter.
pub fn build_filter_content(thread: &ThreadRecord, max_tokens: usize) -> String {
    let title = bounded_title(&thread.title, max_tokens);
    let body = markdown_to_plain_text(&thread.selftext);
    let budget = max_tokens.saturating_mul(4);
    let overhead = "Title: \nBody: ".len() + title.chars().count();
    let body = truncate_chars(&body, budget.saturating_sub(overhead));
    format!("Title: {}\nBody: {}", title, body)
}

struct FlatComment {
    depth: usize,
    score: i64,
    body: String,
}

/// Pre-order walk over the comment tree.
fn flatten(comments: &[CommentRecord]) -> Vec<FlatComment> {
    let mut flat = Vec::new();
    let mut stack: Vec<(&CommentRecord, usize)> = comments.iter().rev().map(|c| (c, 0)).collect();

    while let Some((comment, depth)) = stack.pop() {
        flat.push(FlatComment {
            depth,
            score: comment.score,
            body: markdown_to_plain_text(&comment.body),
        });
        stack.extend(comment.replies.iter().rev().map(|reply| (reply, depth + 1)));
    }
    flat
}

fn render(title: &str, body: &str, comments: &[FlatComment], included: &[bool]) -> String {
    let body = if body.is_empty() { NO_BODY } else { body };
    let mut context = format!("POST TITLE: {}\nPOST BODY: {}\n\n--- COMMENTS ---\n\n", title, body);

    for (comment, _) in comments.iter().zip(included).filter(|(_, keep)| **keep) {
        let indent = "    ".repeat(comment.depth);
        context.push_str(&format!("{}Comment (Score: {}):\n", indent, comment.score));
        context.push_str(&format!("{}{}\n{}---\n", indent, comment.body, indent));
    }
    context
}

/// Renders the thread for the extraction prompt within `max_tokens`.
///
/// At most `max_comments` comments are kept, shallower ones first and then
/// in reading order, so a kept reply always has its parent. Comments are
/// dropped lowest priority first until the estimate fits; a post that is too
/// large on its own has its body cut. Overlong titles are cut to half the
/// budget up front.
pub fn build_thread_context(
    thread: &ThreadRecord,
    max_comments: usize,
    max_tokens: usize,
) -> ThreadContext {
    let title = bounded_title(&thread.title, max_tokens);
    let title = title.as_str();
    let body = markdown_to_plain_text(&thread.selftext);
    let comments = flatten(&thread.comments);

    let mut priority: Vec<usize> = (0..comments.len()).collect();
    priority.sort_by_key(|&i| comments[i].depth);
    priority.truncate(max_comments);

    let mut included = vec![false; comments.len()];
    for &i in &priority {
        included[i] = true;
    }

    let mut text = render(title, &body, &comments, &included);
    while estimate_token_count(&text) > max_tokens {
        let Some(dropped) = priority.pop() else {
            break;
        };
        included[dropped] = false;
        text = render(title, &body, &comments, &included);
    }

    let mut body_truncated = false;
    if estimate_token_count(&text) > max_tokens {
        let budget = max_tokens.saturating_mul(4);
        let overhead = text.chars().count() - body.chars().count() + TRUNCATION_MARK.len();
        let cut = truncate_chars(&body, budget.saturating_sub(overhead));
        text = render(title, &format!("{}{}", cut, TRUNCATION_MARK), &comments, &included);
        body_truncated = true;
    }

    ThreadContext {
        text,
        comments_total: comments.len(),
        comments_included: priority.len(),
        body_truncated,
    }
}
