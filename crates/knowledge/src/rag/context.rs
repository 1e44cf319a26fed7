//! Context block assembly.

use crate::rag::types::RetrievedItem;

/// Format retrieved passages into the context block of the system
/// instruction, in retrieval order. No items yields an empty string.
pub fn assemble_context(items: &[RetrievedItem]) -> String {
    items
        .iter()
        .map(|item| {
            format!(
                "---\nSource: {} ({})\nAuthor: {} | Date: {}\nContent: {}\n---",
                item.metadata.title,
                item.metadata.url,
                item.metadata.author,
                item.metadata.date,
                item.content
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::CitationMetadata;

    fn item(title: &str, content: &str) -> RetrievedItem {
        RetrievedItem {
            content: content.to_string(),
            metadata: CitationMetadata {
                url: format!("https://forum.example/{}", title),
                title: title.to_string(),
                author: "ada".to_string(),
                date: "2019-04-18".to_string(),
                forum: "Jobs".to_string(),
            },
            similarity: 0.8,
            score: 0.8,
        }
    }

    #[test]
    fn test_empty_items_give_empty_context() {
        assert_eq!(assemble_context(&[]), "");
    }

    #[test]
    fn test_block_format() {
        let context = assemble_context(&[item("wage", "N30,000 & rising")]);
        assert_eq!(
            context,
            "---\nSource: wage (https://forum.example/wage)\nAuthor: ada | Date: 2019-04-18\nContent: N30,000 & rising\n---"
        );
    }

    #[test]
    fn test_blocks_joined_by_blank_line_in_order() {
        let context = assemble_context(&[item("first", "one"), item("second", "two")]);
        let blocks: Vec<&str> = context.split("\n\n").collect();
        assert_eq!(blocks.len(), 2);
        assert!(blocks[0].contains("Source: first"));
        assert!(blocks[1].contains("Source: second"));
    }
}
