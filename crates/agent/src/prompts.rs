//! Prompt text and message assembly.

use sleuth_core::message::Message;

use crate::workspace::ContextFragment;

pub const AGENT_ROLE: &str = "\
You are a code search agent that helps find relevant code based on queries.
Even if not explicitly stated, the query should be understood to refer to the current codebase,
and not a general-knowledge question.
Your goal is to find code definitions, implementations, and usages that answer the user's query.
";

pub const INSTRUCTIONS: &str = "\
Determine the next tool to call to search for code related to the query, or `answer` if you have enough
information to answer the query.
- Round trips are expensive! If you have multiple search terms to learn about, group them in a single call.
- Of course, `abort` and `answer` tools cannot be composed with others.
";

pub const START_BROAD: &str = "\
Start with broad searches, and then explore more specific code units once you find a foothold.
For example, if the user is asking
[how do Cassandra reads prevent compaction from invalidating the sstables they are referencing]
then we should start with searchSymbols([\".*SSTable.*\", \".*Compaction.*\", \".*reference.*\"]),
instead of a more specific pattern like \".*SSTable.*compaction.*\" or \".*compaction.*invalidation.*\".
But once you have found specific relevant classes or methods, you can ask for them directly, you don't
need to make another symbol request first.
Don't forget to review your previous steps -- the search results won't change so don't repeat yourself!
";

pub const BEAST_MODE: &str = "\
<beast-mode>
MAXIMUM PRIORITY OVERRIDE!
- YOU MUST FINALIZE RESULTS NOW WITH AVAILABLE INFORMATION
- USE DISCOVERED CODE UNITS TO PROVIDE BEST POSSIBLE ANSWER,
- OR EXPLAIN WHY YOU DID NOT SUCCEED
</beast-mode>
";

pub const SEED_SYSTEM: &str = "\
You are an expert software architect
evaluating which code fragments are relevant to a user query.
Review the following list of code fragments and select the ones most relevant to the query.
Make sure to include the fully qualified source (class, method, etc) as well as the code.
";

pub const SUMMARIZE_SYSTEM: &str = "\
You are a code expert that extracts ALL information from the input that is relevant to the given query.
Your partner has included their reasoning about what they are looking for; your work will be the only knowledge
about this tool call that they will have to work with. They will not see the full result, so make it comprehensive!
Be particularly sure to include ALL relevant source code chunks so they can reference them in the final answer,
but DO NOT speculate or guess: your answer must ONLY include information in this result!
Here are examples of good and bad extractions:
  - Bad: Found several classes and methods related to the query
  - Good: Found classes org.foo.bar.X and org.foo.baz.Y, and methods org.foo.qux.Z.method1 and org.foo.fizz.W.method2
  - Bad: The Foo class implements the Bar algorithm
  - Good: The Foo class implements the Bar algorithm. Here are all the relevant lines of code:
    ```
    public class Foo {
    ...
    }
    ```
";

/// Which instruction block ends the decision prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guidance {
    /// Nothing useful found yet
    StartBroad,
    Normal,
    Beast,
}

/// A titled piece of knowledge placed in the system prompt.
#[derive(Debug, Clone)]
pub struct KnowledgeEntry {
    pub description: String,
    pub content: String,
}

pub fn system_prompt(knowledge: &[KnowledgeEntry]) -> String {
    let mut prompt = AGENT_ROLE.to_string();
    if !knowledge.is_empty() {
        let entries: Vec<String> = knowledge
            .iter()
            .map(|k| {
                format!(
                    "<entry description=\"{}\">\n{}\n</entry>",
                    k.description, k.content
                )
            })
            .collect();
        prompt.push_str(&format!("\n<knowledge>\n{}\n</knowledge>\n", entries.join("\n")));
    }
    prompt
}

/// Messages for one decision step.
pub fn decide_messages(
    knowledge: &[KnowledgeEntry],
    action_history: &str,
    guidance: Guidance,
    query: &str,
) -> Vec<Message> {
    let instructions = match guidance {
        Guidance::Beast => BEAST_MODE.to_string(),
        Guidance::Normal => INSTRUCTIONS.to_string(),
        Guidance::StartBroad => format!("{INSTRUCTIONS}{START_BROAD}"),
    };
    let user = format!("{action_history}{instructions}<query>\n{query}\n</query>\n");
    vec![Message::system(system_prompt(knowledge)), Message::user(user)]
}

/// Messages asking which of the seed fragments matter for `query`.
pub fn seed_messages(query: &str, fragments: &[ContextFragment]) -> Vec<Message> {
    let rendered: Vec<String> = fragments.iter().map(ContextFragment::render).collect();
    vec![
        Message::system(SEED_SYSTEM),
        Message::user(format!("<query>{query}</query>\n\n{}", rendered.join("\n"))),
    ]
}

/// Messages asking for the query-relevant content of one tool result.
pub fn summarize_messages(
    query: &str,
    reasoning: &str,
    tool_name: &str,
    params: &str,
    result: &str,
) -> Vec<Message> {
    let tag = if params.is_empty() {
        format!("<tool name=\"{tool_name}\">")
    } else {
        format!("<tool name=\"{tool_name}\" {params}>")
    };
    vec![
        Message::system(SUMMARIZE_SYSTEM),
        Message::user(format!(
            "<query>\n{query}\n</query>\n<reasoning>\n{reasoning}\n</reasoning>\n{tag}\n{result}\n</tool>\n"
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_prompt_lists_knowledge() {
        assert_eq!(system_prompt(&[]), AGENT_ROLE);
        let prompt = system_prompt(&[KnowledgeEntry {
            description: "Initial context".into(),
            content: "Foo lives in a.b".into(),
        }]);
        assert!(prompt.contains(
            "<knowledge>\n<entry description=\"Initial context\">\nFoo lives in a.b\n</entry>\n</knowledge>"
        ));
    }

    #[test]
    fn guidance_selects_instructions() {
        let broad = decide_messages(&[], "", Guidance::StartBroad, "where is Foo");
        assert!(broad[1].content.contains("Start with broad searches"));
        assert!(broad[1].content.ends_with("<query>\nwhere is Foo\n</query>\n"));

        let normal = decide_messages(&[], "", Guidance::Normal, "q");
        assert!(normal[1].content.starts_with("Determine the next tool"));
        assert!(!normal[1].content.contains("Start with broad"));

        let beast = decide_messages(&[], "<action-history>\n</action-history>\n", Guidance::Beast, "q");
        assert!(beast[1].content.contains("<beast-mode>"));
        assert!(!beast[1].content.contains("Determine the next tool"));
        assert!(beast[1].content.starts_with("<action-history>"));
    }

    #[test]
    fn summarize_prompt_shape() {
        let messages = summarize_messages("q", "why", "getUsages", "symbols=[\"a\"]", "raw");
        assert_eq!(messages[0].content, SUMMARIZE_SYSTEM);
        assert_eq!(
            messages[1].content,
            "<query>\nq\n</query>\n<reasoning>\nwhy\n</reasoning>\n<tool name=\"getUsages\" symbols=[\"a\"]>\nraw\n</tool>\n"
        );
    }

    #[test]
    fn seed_prompt_includes_fragments() {
        let fragment = ContextFragment::new("Foo.java", "class Foo {}").with_sources(vec!["a.Foo".into()]);
        let messages = seed_messages("where is Foo", &[fragment]);
        assert_eq!(messages[0].content, SEED_SYSTEM);
        assert!(messages[1].content.starts_with("<query>where is Foo</query>\n\n"));
        assert!(messages[1]
            .content
            .contains("<fragment description=\"Foo.java\" sources=\"a.Foo\">"));
    }
}
