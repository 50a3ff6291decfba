// cicd-fixer-rs/src/classifier.rs
// Heuristic error-category and project-language classification for CI/CD logs.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Coarse category of a CI/CD failure.
///
/// Declaration order is the classification priority: when a log matches
/// several categories, the first one listed here is the primary category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorCategory {
    #[serde(rename = "dependency_error")]
    Dependency,
    #[serde(rename = "build_failure")]
    Build,
    #[serde(rename = "test_failure")]
    Test,
    #[serde(rename = "execution_timeout")]
    Timeout,
    #[serde(rename = "docker_error")]
    Docker,
    #[serde(rename = "linting_error")]
    Lint,
    #[serde(rename = "deployment_error")]
    Deploy,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 7] = [
        ErrorCategory::Dependency,
        ErrorCategory::Build,
        ErrorCategory::Test,
        ErrorCategory::Timeout,
        ErrorCategory::Docker,
        ErrorCategory::Lint,
        ErrorCategory::Deploy,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Dependency => "dependency_error",
            ErrorCategory::Build => "build_failure",
            ErrorCategory::Test => "test_failure",
            ErrorCategory::Timeout => "execution_timeout",
            ErrorCategory::Docker => "docker_error",
            ErrorCategory::Lint => "linting_error",
            ErrorCategory::Deploy => "deployment_error",
        }
    }

    /// Prior probability that a fix for this kind of failure works.
    pub fn prior_reliability(&self) -> f64 {
        match self {
            ErrorCategory::Dependency => 0.8,
            ErrorCategory::Lint => 0.9,
            ErrorCategory::Test => 0.7,
            ErrorCategory::Build => 0.6,
            ErrorCategory::Docker => 0.5,
            ErrorCategory::Timeout => 0.4,
            ErrorCategory::Deploy => 0.5,
        }
    }

    /// Map a free-form label (e.g. the `error_type` an analysis collaborator
    /// reports) onto a category.
    pub fn from_label(label: &str) -> Option<Self> {
        let l = label.trim().to_ascii_lowercase();
        if l.is_empty() {
            return None;
        }
        if let Some(c) = Self::ALL.iter().find(|c| c.as_str() == l) {
            return Some(*c);
        }

        if l.contains("depend") || l.contains("package") || l.contains("import") {
            Some(ErrorCategory::Dependency)
        } else if l.contains("lint") || l.contains("style") || l.contains("format") {
            Some(ErrorCategory::Lint)
        } else if l.contains("test") || l.contains("assert") {
            Some(ErrorCategory::Test)
        } else if l.contains("timeout") || l.contains("timed out") {
            Some(ErrorCategory::Timeout)
        } else if l.contains("docker") || l.contains("container") || l.contains("image") {
            Some(ErrorCategory::Docker)
        } else if l.contains("deploy") || l.contains("release") || l.contains("publish") {
            Some(ErrorCategory::Deploy)
        } else if l.contains("build") || l.contains("compil") || l.contains("syntax") {
            Some(ErrorCategory::Build)
        } else {
            None
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy interface for error classification.
pub trait ErrorClassifier {
    /// Every category the log matches, each at most once, in priority order.
    fn classify(&self, error_text: &str) -> Vec<ErrorCategory>;

    fn primary(&self, error_text: &str) -> Option<ErrorCategory> {
        self.classify(error_text).into_iter().next()
    }
}

static CATEGORY_PATTERNS: Lazy<Vec<(ErrorCategory, Vec<Regex>)>> = Lazy::new(|| {
    let table: [(ErrorCategory, &[&str]); 7] = [
        (
            ErrorCategory::Dependency,
            &[
                r"npm.*install.*failed",
                r"pip.*install.*error",
                r"package.*not.*found",
                r"dependency.*conflict",
                r"peer.*dependency",
                r"modulenotfounderror",
                r"importerror",
            ],
        ),
        (
            ErrorCategory::Build,
            &[
                r"compilation.*failed",
                r"build.*failed",
                r"webpack.*error",
                r"typescript.*error",
                r"syntax.*error",
                r"compilation error",
            ],
        ),
        (
            ErrorCategory::Test,
            &[
                r"test.*failed",
                r"assertion.*failed",
                r"jest.*failed",
                r"pytest.*failed",
                r"unit.*test.*error",
                r"integration.*test.*failed",
            ],
        ),
        (
            ErrorCategory::Timeout,
            &[
                r"timeout",
                r"exceeded.*time",
                r"job.*cancelled",
                r"process.*killed",
                r"time.*limit.*exceeded",
            ],
        ),
        (
            ErrorCategory::Docker,
            &[
                r"docker.*build.*failed",
                r"dockerfile.*error",
                r"container.*failed",
                r"image.*not.*found",
                r"docker.*push.*failed",
            ],
        ),
        (
            ErrorCategory::Lint,
            &[
                r"eslint.*error",
                r"pylint.*error",
                r"flake8.*error",
                r"prettier.*error",
                r"code.*style.*violation",
            ],
        ),
        (
            ErrorCategory::Deploy,
            &[
                r"deployment.*failed",
                r"publish.*failed",
                r"release.*error",
                r"upload.*failed",
                r"deploy.*timeout",
            ],
        ),
    ];

    table
        .iter()
        .map(|(category, patterns)| {
            let compiled = patterns
                .iter()
                .filter_map(|p| Regex::new(p).ok())
                .collect();
            (*category, compiled)
        })
        .collect()
});

/// Regex-table classifier over the lower-cased log text.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexErrorClassifier;

impl ErrorClassifier for RegexErrorClassifier {
    fn classify(&self, error_text: &str) -> Vec<ErrorCategory> {
        if error_text.is_empty() {
            return Vec::new();
        }
        let lowered = error_text.to_lowercase();

        CATEGORY_PATTERNS
            .iter()
            .filter(|(_, patterns)| patterns.iter().any(|re| re.is_match(&lowered)))
            .map(|(category, _)| *category)
            .collect()
    }
}

const LANGUAGE_INDICATORS: [(&str, &[&str]); 9] = [
    (
        "javascript",
        &["package.json", "npm", "yarn", "node", "webpack", "jest", ".js", ".ts"],
    ),
    (
        "python",
        &["requirements.txt", "pip", "pytest", "python", ".py", "virtualenv"],
    ),
    ("java", &["maven", "gradle", "junit", ".java", "mvn", "pom.xml"]),
    ("csharp", &[".net", "dotnet", "nuget", ".cs", "msbuild"]),
    ("go", &["go.mod", "go build", ".go", "golang"]),
    ("rust", &["cargo", ".rs", "rustc", "rust"]),
    ("ruby", &["gemfile", "bundle", ".rb", "rake"]),
    ("php", &["composer", ".php", "phpunit"]),
    ("docker", &["dockerfile", "docker", "container"]),
];

/// Guess the primary language of a project from its name and a failure log.
///
/// Each language scores one point per indicator substring present; the
/// highest score wins and earlier languages win ties.
pub fn detect_project_language(repo_name: &str, error_text: &str) -> Option<&'static str> {
    let haystack = format!("{repo_name} {error_text}").to_lowercase();

    let mut best: Option<(&'static str, usize)> = None;
    for (language, indicators) in LANGUAGE_INDICATORS {
        let score = indicators.iter().filter(|i| haystack.contains(*i)).count();
        if score == 0 {
            continue;
        }
        match best {
            Some((_, best_score)) if best_score >= score => {}
            _ => best = Some((language, score)),
        }
    }

    best.map(|(language, _)| language)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_each_category_once_in_priority_order() {
        let log = "Test suite failed\nnpm ERR! peer dependency missing\nbuild failed after test failed";
        let categories = RegexErrorClassifier.classify(log);
        assert_eq!(
            categories,
            vec![
                ErrorCategory::Dependency,
                ErrorCategory::Build,
                ErrorCategory::Test
            ]
        );
        assert_eq!(
            RegexErrorClassifier.primary(log),
            Some(ErrorCategory::Dependency)
        );
    }

    #[test]
    fn unclassified_logs_have_no_primary() {
        assert!(RegexErrorClassifier.classify("").is_empty());
        assert_eq!(RegexErrorClassifier.primary("all good here"), None);
    }

    #[test]
    fn labels_map_onto_categories() {
        assert_eq!(
            ErrorCategory::from_label("linting_error"),
            Some(ErrorCategory::Lint)
        );
        assert_eq!(
            ErrorCategory::from_label("Dependency Resolution"),
            Some(ErrorCategory::Dependency)
        );
        assert_eq!(ErrorCategory::from_label("cosmic rays"), None);
    }

    #[test]
    fn language_detection_prefers_highest_score() {
        assert_eq!(
            detect_project_language("widgets", "npm ERR! in package.json (node 18)"),
            Some("javascript")
        );
        assert_eq!(
            detect_project_language("api", "pytest failed: requirements.txt missing"),
            Some("python")
        );
        assert_eq!(detect_project_language("x", "nothing"), None);
    }
}
