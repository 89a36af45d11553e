//! Built-in prompts for the clustering pass. Filter, extraction and report
//! prompts come from the concept file.

pub const CLUSTERING_SYSTEM_PROMPT: &str = "You are a data analyst specializing in qualitative data. \
Your task is to perform thematic analysis on a list of user-provided items, group them into \
high-level categories, and count the occurrences for each category.";

pub fn clustering_user_prompt(
    display_name: &str,
    description: &str,
    items: &[&str],
    max_examples: usize,
) -> String {
    let listing: String = items.iter().map(|item| format!("- {}\n", item)).collect();

    format!(
        "Analyze the following list of raw '{description}' (category: {display_name}). \
Group similar items into meaningful, high-level themes.

For each theme, provide:
1. A concise `theme_name`.
2. The `count` of how many raw items fall into that theme.
3. A list of `example_items` (up to {max_examples}) from the raw data that best represent the theme.

Return a JSON object with a single key `themes` holding the list of these themes, sorted by count in descending order.
Example format:
{{
  \"themes\": [
    {{\"theme_name\": \"Example Theme 1\", \"count\": 42, \"example_items\": [\"Raw item A\", \"Raw item B\"]}},
    {{\"theme_name\": \"Example Theme 2\", \"count\": 19, \"example_items\": [\"Raw item C\"]}}
  ]
}}

Here is the list of {count} raw items to analyze:
---
{listing}---
",
        description = description,
        display_name = display_name,
        max_examples = max_examples,
        count = items.len(),
        listing = listing,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clustering_prompt_lists_items() {
        let prompt = clustering_user_prompt(
            "Unmet Needs",
            "features or solutions users wish they had",
            &["large buttons", "simpler video calls"],
            3,
        );
        assert!(prompt.contains("'features or solutions users wish they had' (category: Unmet Needs)"));
        assert!(prompt.contains("- large buttons\n- simpler video calls\n---"));
        assert!(prompt.contains("(up to 3)"));
        assert!(prompt.contains("\"themes\": ["));
    }
}
