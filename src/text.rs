// ✂️ Text helpers shared by the importers

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn bill_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"([A-Z]*)\s*0*([-\d]+)").expect("bill id pattern is valid"))
}

/// Canonical bill id: no periods, one space between the letters and the
/// number, no leading zeros.
///
/// "A.B. 074" -> "AB 74", "PR19-0041" -> "PR 19-0041"
pub fn fix_bill_id(bill_id: &str) -> String {
    let without_periods = bill_id.replace('.', "");
    bill_id_re().replacen(&without_periods, 1, "${1} ${2}").into_owned()
}

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are", "as", "at", "be",
    "because", "been", "before", "being", "below", "between", "both", "but", "by", "can", "did", "do", "does",
    "doing", "down", "during", "each", "few", "for", "from", "further", "had", "has", "have", "having", "he", "her",
    "here", "hers", "herself", "him", "himself", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself",
    "just", "me", "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or",
    "other", "our", "ours", "ourselves", "out", "over", "own", "s", "same", "she", "should", "so", "some", "such",
    "t", "than", "that", "the", "their", "theirs", "them", "themselves", "then", "there", "these", "they", "this",
    "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were", "what", "when", "where",
    "which", "while", "who", "whom", "why", "will", "with", "you", "your", "yours", "yourself", "yourselves",
];

/// Lowercased words of `text` minus English stopwords.
pub fn keywordize(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(str::to_lowercase)
        .filter(|word| !STOPWORDS.contains(&word.as_str()))
        .collect()
}
