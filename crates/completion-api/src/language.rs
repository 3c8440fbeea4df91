//! Language registry.
//!
//! Maps editor language ids onto everything the lifecycle needs to know per
//! language: the acceptance-model one-hot index, comment style for context
//! injection, tree-sitter grammar for syntax checking, and the front-end
//! classification used by the CSS bleed discarder.

use tree_sitter::Language;

/// Languages the gateway knows by name. Everything else is `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lang {
    Python,
    JavaScript,
    TypeScript,
    TypeScriptTsx,
    Go,
    Java,
    C,
    Cpp,
    Rust,
    Php,
    Ruby,
    CSharp,
    Kotlin,
    Swift,
    Scala,
    Html,
    Css,
    Vue,
    Shell,
    Lua,
    Dart,
    Other,
}

impl Lang {
    /// Resolve an editor language id, accepting the common aliases.
    pub fn from_language_id(language_id: &str) -> Self {
        match language_id.trim().to_lowercase().as_str() {
            "python" | "py" => Lang::Python,
            "javascript" | "js" | "jsx" | "javascriptreact" => Lang::JavaScript,
            "typescript" | "ts" => Lang::TypeScript,
            "typescriptreact" | "tsx" => Lang::TypeScriptTsx,
            "go" | "golang" => Lang::Go,
            "java" => Lang::Java,
            "c" => Lang::C,
            "cpp" | "c++" | "cc" => Lang::Cpp,
            "rust" | "rs" => Lang::Rust,
            "php" => Lang::Php,
            "ruby" | "rb" => Lang::Ruby,
            "csharp" | "cs" | "c#" => Lang::CSharp,
            "kotlin" | "kt" => Lang::Kotlin,
            "swift" => Lang::Swift,
            "scala" => Lang::Scala,
            "html" | "htm" => Lang::Html,
            "css" | "scss" | "less" => Lang::Css,
            "vue" => Lang::Vue,
            "shell" | "shellscript" | "sh" | "bash" | "zsh" => Lang::Shell,
            "lua" => Lang::Lua,
            "dart" => Lang::Dart,
            _ => Lang::Other,
        }
    }

    /// One-hot index in the acceptance-model weight vector.
    ///
    /// Unknown languages share the trailing default slot.
    pub fn model_index(&self) -> usize {
        match self {
            Lang::Python => 0,
            Lang::JavaScript => 1,
            Lang::TypeScript | Lang::TypeScriptTsx => 2,
            Lang::Go => 3,
            Lang::Java => 4,
            Lang::C => 5,
            Lang::Cpp => 6,
            Lang::Rust => 7,
            Lang::Php => 8,
            Lang::Ruby => 9,
            Lang::CSharp => 10,
            Lang::Kotlin => 11,
            Lang::Swift => 12,
            Lang::Scala => 13,
            Lang::Html => 14,
            Lang::Css => 15,
            Lang::Vue => 16,
            Lang::Shell => 17,
            Lang::Lua => 18,
            Lang::Dart => 19,
            Lang::Other => 20,
        }
    }

    /// Number of language slots in the acceptance-model weight vector.
    pub const MODEL_SLOTS: usize = 21;

    /// Languages whose completions may exhibit CSS bleed-through.
    pub fn is_front_end(&self) -> bool {
        matches!(
            self,
            Lang::Vue | Lang::Html | Lang::TypeScript | Lang::TypeScriptTsx | Lang::Css
        )
    }

    /// Tree-sitter grammar, where one is bundled.
    pub fn tree_sitter_language(&self) -> Option<Language> {
        match self {
            Lang::Python => Some(tree_sitter_python::LANGUAGE.into()),
            Lang::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            Lang::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            Lang::TypeScriptTsx => Some(tree_sitter_typescript::LANGUAGE_TSX.into()),
            Lang::Go => Some(tree_sitter_go::LANGUAGE.into()),
            Lang::Java => Some(tree_sitter_java::LANGUAGE.into()),
            Lang::C => Some(tree_sitter_c::LANGUAGE.into()),
            Lang::Cpp => Some(tree_sitter_cpp::LANGUAGE.into()),
            Lang::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            Lang::Html => Some(tree_sitter_html::LANGUAGE.into()),
            Lang::Css => Some(tree_sitter_css::LANGUAGE.into()),
            _ => None,
        }
    }

    /// Wrap a context snippet as a comment block keyed on its file path, in
    /// this language's comment style.
    pub fn wrap_comment(&self, file_path: &str, content: &str) -> String {
        match self {
            Lang::Python | Lang::Shell | Lang::Ruby => {
                let mut out = format!("# {file_path}\n");
                for line in content.lines() {
                    out.push_str("# ");
                    out.push_str(line);
                    out.push('\n');
                }
                out.pop();
                out
            }
            Lang::Html | Lang::Vue => {
                format!("<!-- {file_path}\n{content}\n-->")
            }
            Lang::Lua => {
                format!("--[[ {file_path}\n{content}\n--]]")
            }
            _ => format!("/* {file_path}\n{content}\n*/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aliases_resolve() {
        assert_eq!(Lang::from_language_id("py"), Lang::Python);
        assert_eq!(Lang::from_language_id("Golang"), Lang::Go);
        assert_eq!(Lang::from_language_id("TypeScript"), Lang::TypeScript);
        assert_eq!(Lang::from_language_id("tsx"), Lang::TypeScriptTsx);
        assert_eq!(Lang::from_language_id("brainfuck"), Lang::Other);
        assert_eq!(Lang::from_language_id(""), Lang::Other);
    }

    #[test]
    fn test_model_indices_fit_slots() {
        for lang in [
            Lang::Python,
            Lang::Dart,
            Lang::Other,
            Lang::TypeScriptTsx,
            Lang::Shell,
        ] {
            assert!(lang.model_index() < Lang::MODEL_SLOTS);
        }
        assert_eq!(Lang::Other.model_index(), Lang::MODEL_SLOTS - 1);
    }

    #[test]
    fn test_front_end_classification() {
        assert!(Lang::Vue.is_front_end());
        assert!(Lang::Html.is_front_end());
        assert!(Lang::TypeScript.is_front_end());
        assert!(Lang::Css.is_front_end());
        assert!(!Lang::Go.is_front_end());
        assert!(!Lang::Python.is_front_end());
    }

    #[test]
    fn test_wrap_comment_styles() {
        let c = Lang::Python.wrap_comment("a/b.py", "x = 1\ny = 2");
        assert_eq!(c, "# a/b.py\n# x = 1\n# y = 2");

        let c = Lang::Go.wrap_comment("m.go", "func F() {}");
        assert!(c.starts_with("/* m.go\n"));
        assert!(c.ends_with("\n*/"));

        let c = Lang::Html.wrap_comment("p.html", "<div/>");
        assert!(c.starts_with("<!-- p.html"));
        assert!(c.ends_with("-->"));
    }

    #[test]
    fn test_grammars_present_for_syntax_checked_languages() {
        assert!(Lang::Python.tree_sitter_language().is_some());
        assert!(Lang::Rust.tree_sitter_language().is_some());
        assert!(Lang::Vue.tree_sitter_language().is_none());
        assert!(Lang::Other.tree_sitter_language().is_none());
    }
}
