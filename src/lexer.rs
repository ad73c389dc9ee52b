//! Per-line lexical tokenizers for the languages whose drift we can judge token by token.

use std::collections::HashSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Language {
    C,
    Cpp,
    CSharp,
    Java,
    NotSupported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Keyword,
    Identifier,
    Number,
    String,
    Char,
    Comment,
    Preprocessor,
    Operator,
    Punctuation,
}

impl TokenKind {
    /// Tokens whose change can alter program behavior.
    pub fn is_semantic(self) -> bool {
        !matches!(self, TokenKind::Comment | TokenKind::Punctuation)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
}

pub trait Tokenize: Sync {
    fn language(&self) -> Language;
    fn tokenize(&self, line: &str) -> Vec<Token>;
}

struct PlainText;

impl Tokenize for PlainText {
    fn language(&self) -> Language {
        Language::NotSupported
    }

    fn tokenize(&self, _line: &str) -> Vec<Token> {
        Vec::new()
    }
}

struct CFamily {
    language: Language,
    keywords: &'static [&'static str],
}

static C_FAMILY_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?x)
        (?P<comment>//.*|/\*.*?\*/|/\*.*$)
        |(?P<pre>^\s*\#\s*[A-Za-z_]+)
        |(?P<string>@?"(?:[^"\\]|\\.)*"?)
        |(?P<char>'(?:[^'\\]|\\.)*'?)
        |(?P<number>(?:0[xX][0-9a-fA-F]+|[0-9]+\.?[0-9]*(?:[eE][+-]?[0-9]+)?|\.[0-9]+)[uUlLfFdDmM]*)
        |(?P<ident>[A-Za-z_$][A-Za-z0-9_$]*)
        |(?P<op>::|->|\+\+|--|<<=|>>=|<<|>>|&&|\|\||[-+*/%&|^!~<>=?]=?)
        |(?P<punct>[{}()\[\];,.:@\#])
        "#,
    )
    .expect("c-family token pattern compiles")
});

impl Tokenize for CFamily {
    fn language(&self) -> Language {
        self.language
    }

    fn tokenize(&self, line: &str) -> Vec<Token> {
        C_FAMILY_TOKEN
            .captures_iter(line)
            .filter_map(|caps| {
                let (kind, m) = [
                    (TokenKind::Comment, "comment"),
                    (TokenKind::Preprocessor, "pre"),
                    (TokenKind::String, "string"),
                    (TokenKind::Char, "char"),
                    (TokenKind::Number, "number"),
                    (TokenKind::Identifier, "ident"),
                    (TokenKind::Operator, "op"),
                    (TokenKind::Punctuation, "punct"),
                ]
                .into_iter()
                .find_map(|(kind, group)| caps.name(group).map(|m| (kind, m)))?;
                let text = m.as_str().trim().to_string();
                let kind = if kind == TokenKind::Identifier && self.keywords.contains(&text.as_str())
                {
                    TokenKind::Keyword
                } else {
                    kind
                };
                Some(Token { kind, text })
            })
            .collect()
    }
}

const C_KEYWORDS: &[&str] = &[
    "auto", "break", "case", "char", "const", "continue", "default", "do", "double", "else",
    "enum", "extern", "float", "for", "goto", "if", "inline", "int", "long", "register",
    "restrict", "return", "short", "signed", "sizeof", "static", "struct", "switch", "typedef",
    "union", "unsigned", "void", "volatile", "while", "_Bool", "NULL",
];

const CPP_KEYWORDS: &[&str] = &[
    "auto", "bool", "break", "case", "catch", "char", "class", "const", "constexpr",
    "const_cast", "continue", "decltype", "default", "delete", "do", "double", "dynamic_cast",
    "else", "enum", "explicit", "extern", "false", "final", "float", "for", "friend", "goto",
    "if", "inline", "int", "long", "mutable", "namespace", "new", "noexcept", "nullptr",
    "operator", "override", "private", "protected", "public", "register", "reinterpret_cast",
    "return", "short", "signed", "sizeof", "static", "static_cast", "struct", "switch",
    "template", "this", "throw", "true", "try", "typedef", "typename", "union", "unsigned",
    "using", "virtual", "void", "volatile", "while",
];

const CSHARP_KEYWORDS: &[&str] = &[
    "abstract", "as", "base", "bool", "break", "byte", "case", "catch", "char", "checked",
    "class", "const", "continue", "decimal", "default", "delegate", "do", "double", "else",
    "enum", "event", "explicit", "extern", "false", "finally", "fixed", "float", "for",
    "foreach", "goto", "if", "implicit", "in", "int", "interface", "internal", "is", "lock",
    "long", "namespace", "new", "null", "object", "operator", "out", "override", "params",
    "private", "protected", "public", "readonly", "ref", "return", "sbyte", "sealed", "short",
    "sizeof", "static", "string", "struct", "switch", "this", "throw", "true", "try", "typeof",
    "uint", "ulong", "unchecked", "unsafe", "ushort", "using", "var", "virtual", "void",
    "volatile", "while",
];

const JAVA_KEYWORDS: &[&str] = &[
    "abstract", "assert", "boolean", "break", "byte", "case", "catch", "char", "class", "const",
    "continue", "default", "do", "double", "else", "enum", "extends", "false", "final",
    "finally", "float", "for", "if", "implements", "import", "instanceof", "int", "interface",
    "long", "native", "new", "null", "package", "private", "protected", "public", "return",
    "short", "static", "super", "switch", "synchronized", "this", "throw", "throws", "true",
    "try", "void", "volatile", "while", "var",
];

static PLAIN: PlainText = PlainText;
static C: CFamily = CFamily {
    language: Language::C,
    keywords: C_KEYWORDS,
};
static CPP: CFamily = CFamily {
    language: Language::Cpp,
    keywords: CPP_KEYWORDS,
};
static CSHARP: CFamily = CFamily {
    language: Language::CSharp,
    keywords: CSHARP_KEYWORDS,
};
static JAVA: CFamily = CFamily {
    language: Language::Java,
    keywords: JAVA_KEYWORDS,
};

static BY_EXTENSION: &[(&str, &dyn Tokenize)] = &[
    ("c", &C),
    ("h", &C),
    ("cc", &CPP),
    ("cpp", &CPP),
    ("cxx", &CPP),
    ("hpp", &CPP),
    ("hh", &CPP),
    ("hxx", &CPP),
    ("cs", &CSHARP),
    ("java", &JAVA),
];

pub fn tokenizer_for(path: &Path) -> &'static dyn Tokenize {
    let Some(ext) = path.extension().and_then(|ext| ext.to_str()) else {
        return &PLAIN;
    };
    let ext = ext.to_ascii_lowercase();
    BY_EXTENSION
        .iter()
        .find(|(candidate, _)| *candidate == ext)
        .map(|(_, tokenizer)| *tokenizer)
        .unwrap_or(&PLAIN)
}

/// Tokens of a patch line that the matching file line lacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LanguageDiff {
    pub language: Language,
    pub patch_tokens: Vec<Token>,
    pub file_tokens: Vec<Token>,
    pub diff_tokens: Vec<Token>,
}

pub fn language_diff(tokenizer: &dyn Tokenize, patch_line: &str, file_line: &str) -> Option<LanguageDiff> {
    if tokenizer.language() == Language::NotSupported {
        return None;
    }
    let patch_tokens = tokenizer.tokenize(patch_line);
    let file_tokens = tokenizer.tokenize(file_line);
    let present: HashSet<&Token> = file_tokens.iter().collect();
    let mut seen = HashSet::new();
    let diff_tokens = patch_tokens
        .iter()
        .filter(|token| !present.contains(token) && seen.insert(*token))
        .cloned()
        .collect();
    Some(LanguageDiff {
        language: tokenizer.language(),
        patch_tokens,
        file_tokens,
        diff_tokens,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(tokens: &[Token]) -> Vec<TokenKind> {
        tokens.iter().map(|token| token.kind).collect()
    }

    #[test]
    fn lookup_maps_extensions() {
        assert_eq!(tokenizer_for(Path::new("a/b.c")).language(), Language::C);
        assert_eq!(tokenizer_for(Path::new("x.HPP")).language(), Language::Cpp);
        assert_eq!(tokenizer_for(Path::new("Main.java")).language(), Language::Java);
        assert_eq!(tokenizer_for(Path::new("P.cs")).language(), Language::CSharp);
        assert_eq!(tokenizer_for(Path::new("notes.md")).language(), Language::NotSupported);
        assert_eq!(tokenizer_for(Path::new("Makefile")).language(), Language::NotSupported);
    }

    #[test]
    fn c_lexer_splits_statement() {
        let tokens = tokenizer_for(Path::new("f.c")).tokenize("  if (len > 0x10) return -1; // clamp");
        assert_eq!(
            kinds(&tokens),
            vec![
                TokenKind::Keyword,
                TokenKind::Punctuation,
                TokenKind::Identifier,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::Punctuation,
                TokenKind::Keyword,
                TokenKind::Operator,
                TokenKind::Number,
                TokenKind::Punctuation,
                TokenKind::Comment,
            ]
        );
        assert_eq!(tokens[2].text, "len");
    }

    #[test]
    fn strings_and_preprocessor_are_single_tokens() {
        let tokens = tokenizer_for(Path::new("f.h")).tokenize("#include \"a b.h\"");
        assert_eq!(kinds(&tokens), vec![TokenKind::Preprocessor, TokenKind::String]);
        assert_eq!(tokens[0].text, "#include");
    }

    #[test]
    fn language_diff_reports_missing_tokens() {
        let tokenizer = tokenizer_for(Path::new("f.c"));
        let diff = language_diff(tokenizer, "x = y + 1;", "x = z + 1;").expect("supported");
        assert_eq!(
            diff.diff_tokens,
            vec![Token {
                kind: TokenKind::Identifier,
                text: "y".into()
            }]
        );
        assert!(language_diff(tokenizer_for(Path::new("f.txt")), "a", "b").is_none());
    }

    #[test]
    fn comment_only_drift_is_not_semantic() {
        let tokenizer = tokenizer_for(Path::new("f.java"));
        let diff = language_diff(tokenizer, "int a = 1; // old", "int a = 1; // new").expect("java");
        assert!(diff.diff_tokens.iter().all(|token| !token.kind.is_semantic()));
    }
}
