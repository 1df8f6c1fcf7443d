use grep::regex::RegexMatcher;
use grep::searcher::{Searcher, Sink, SinkMatch};
use std::error::Error;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

// Directories holding the crate's own Rust sources.
const SOURCE_DIRS: &[&str] = &["risk", "cli", "tests", "benches"];

// Words that mark leftover edit notes rather than real comments.
const FORBIDDEN_WORDS: &[&str] = &[
    "FIXED",
    "CORRECTED",
    "FIX",
    "FIXES",
    "NEW",
    "CHANGED",
    "CHANGES",
    "CHANGE",
    "MODIFIED",
    "MODIFIES",
    "MODIFY",
    "UPDATED",
    "UPDATES",
    "UPDATE",
];

#[derive(Clone, Copy)]
enum Rule {
    UnderscoreBinding,
    ForbiddenCommentWord,
    StarsInComment,
    AllCapsComment,
    AllowDeadCode,
}

impl Rule {
    const ALL: [Rule; 5] = [
        Rule::UnderscoreBinding,
        Rule::ForbiddenCommentWord,
        Rule::StarsInComment,
        Rule::AllCapsComment,
        Rule::AllowDeadCode,
    ];

    fn pattern(self) -> String {
        match self {
            Rule::UnderscoreBinding => r"\b(_[a-zA-Z0-9_]+)\b".to_string(),
            Rule::ForbiddenCommentWord => {
                format!(r"(//|/\*).*(?:{})", FORBIDDEN_WORDS.join("|"))
            }
            Rule::StarsInComment => r"(//|/\*).*\*\*".to_string(),
            Rule::AllCapsComment => r"(//|/\*).*".to_string(),
            Rule::AllowDeadCode => r"#\s*\[\s*allow\s*\(\s*dead_code\s*\)\s*\]".to_string(),
        }
    }

    fn advice(self) -> &'static str {
        match self {
            Rule::UnderscoreBinding => {
                "Underscore-prefixed names are not allowed. Use the binding or remove it."
            }
            Rule::ForbiddenCommentWord => {
                "Comments must describe the code, not its edit history. Remove edit markers such as these."
            }
            Rule::StarsInComment => "'**' is only allowed in doc comments.",
            Rule::AllCapsComment => "Comments written entirely in capitals are not allowed.",
            Rule::AllowDeadCode => {
                "#[allow(dead_code)] is not allowed. Use the code or delete it."
            }
        }
    }

    /// Second-stage filter on a line the regex matched.
    fn is_violation(self, line: &str) -> bool {
        match self {
            Rule::UnderscoreBinding => !is_comment(line) && !underscore_only_in_strings(line),
            Rule::ForbiddenCommentWord | Rule::AllowDeadCode => true,
            Rule::StarsInComment => !is_doc_comment(line),
            Rule::AllCapsComment => comment_text(line).is_some_and(|text| {
                let letters: Vec<char> = text.chars().filter(|c| c.is_alphabetic()).collect();
                !letters.is_empty() && letters.iter().all(|c| c.is_uppercase())
            }),
        }
    }
}

struct PolicyCollector {
    rule: Rule,
    violations: Vec<String>,
}

impl Sink for PolicyCollector {
    type Error = std::io::Error;

    fn matched(&mut self, _: &Searcher, mat: &SinkMatch) -> Result<bool, Self::Error> {
        let line_number = mat.line_number().unwrap_or(0);
        let line_text = std::str::from_utf8(mat.bytes()).unwrap_or("").trim_end();
        if self.rule.is_violation(line_text) {
            self.violations.push(format!("{line_number}:{line_text}"));
        }
        Ok(true)
    }
}

fn is_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("//") || trimmed.starts_with("/*") || trimmed.starts_with('*')
}

fn is_doc_comment(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("///") || trimmed.starts_with("//!")
}

fn comment_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    for prefix in ["///", "//!", "//"] {
        if let Some(rest) = trimmed.strip_prefix(prefix) {
            return Some(rest.trim());
        }
    }
    let start = line.find("/*")? + 2;
    let rest = &line[start..];
    Some(rest.find("*/").map_or(rest, |end| &rest[..end]).trim())
}

// Odd-numbered segments between double quotes are string contents.
fn underscore_only_in_strings(line: &str) -> bool {
    line.contains('"')
        && line
            .split('"')
            .enumerate()
            .any(|(i, part)| i % 2 == 1 && part.contains('_'))
}

fn rust_sources() -> Vec<PathBuf> {
    SOURCE_DIRS
        .iter()
        .filter(|dir| Path::new(dir).is_dir())
        .flat_map(|dir| WalkDir::new(dir).into_iter().filter_map(|e| e.ok()))
        .filter(|e| e.path().extension().is_some_and(|ext| ext == "rs"))
        .map(|e| e.into_path())
        .collect()
}

fn check(rule: Rule, sources: &[PathBuf]) -> Result<(), Box<dyn Error>> {
    let matcher = RegexMatcher::new_line_matcher(&rule.pattern())?;
    let mut searcher = Searcher::new();

    for path in sources {
        let mut collector = PolicyCollector {
            rule,
            violations: Vec::new(),
        };
        searcher.search_path(&matcher, path, &mut collector)?;
        if !collector.violations.is_empty() {
            let mut message = format!(
                "\nSource policy violation in {} ({} lines):\n",
                path.display(),
                collector.violations.len()
            );
            for violation in &collector.violations {
                message.push_str(&format!("   {violation}\n"));
            }
            message.push_str(&format!("\n{}\n", rule.advice()));
            return Err(message.into());
        }
    }
    Ok(())
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    for dir in SOURCE_DIRS {
        println!("cargo:rerun-if-changed={dir}");
    }

    let sources = rust_sources();
    for rule in Rule::ALL {
        if let Err(e) = check(rule, &sources) {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
