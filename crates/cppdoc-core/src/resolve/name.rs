//! Parser for C++ type names and name mentions.
//!
//! References carry type text as written (`const std::vector<Widget>&`,
//! `ui::Widget *`, `unsigned long`). Lookup only cares about the named
//! entity, so the parser strips everything that does not change which
//! declaration is meant.
//!
//! ## Grammar
//!
//! ```text
//! <name>      := <prefix>* (<builtin>+ | ["::"] <component> ("::" <component>)*)
//!                <suffix>* [<params> <suffix>*]
//! <prefix>    := "const" | "volatile" | "struct" | "class" | "union" | "enum" | "typename"
//! <builtin>   := "int" | "unsigned" | "long" | "double" | ...
//! <component> := ident ["<" args ">"] | "operator" op
//! <suffix>    := "*" | "&" | "&&" | "[" extent "]" | "const" | "volatile"
//! <params>    := "(" args ")"
//! ```
//!
//! A parameter list only makes sense on mentions (`bar(int)`), where it
//! selects one overload.

use thiserror::Error;
use winnow::ascii::multispace0;
use winnow::combinator::{alt, delimited, opt, preceded, repeat, separated, terminated};
use winnow::error::{ErrMode, ParserError};
use winnow::prelude::*;
use winnow::token::{take_till, take_while};
use winnow::ModalResult;

use crate::model::normalize_type_text;

/// Words that make up fundamental types.
const BUILTIN_WORDS: &[&str] = &[
    "void", "bool", "char", "wchar_t", "char8_t", "char16_t", "char32_t", "short", "int", "long",
    "signed", "unsigned", "float", "double", "auto",
];

const PREFIX_WORDS: &[&str] = &[
    "const", "volatile", "struct", "class", "union", "enum", "typename",
];

const CV_WORDS: &[&str] = &["const", "volatile"];

/// Error type for name parsing.
#[derive(Debug, Error)]
#[error("cannot parse type name '{input}': {message}")]
pub struct NameError {
    pub input: String,
    pub message: String,
}

/// One `::`-separated component of a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameComponent {
    pub ident: String,
    /// Normalized template arguments, if written.
    pub template_args: Option<Vec<String>>,
}

/// A parsed type name or mention.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeName {
    /// Leading `::`: look up in the global namespace only.
    pub global: bool,
    pub components: Vec<NameComponent>,
    /// Normalized parameter types, for mentions like `bar(int)`.
    pub params: Option<Vec<String>>,
    /// A fundamental type such as `unsigned long`; never in the graph.
    pub fundamental: bool,
}

impl TypeName {
    /// Component identifiers joined with `::`, template arguments dropped.
    pub fn lookup_key(&self) -> String {
        self.components
            .iter()
            .map(|c| c.ident.as_str())
            .collect::<Vec<_>>()
            .join("::")
    }

    /// Template arguments of the last component.
    pub fn template_args(&self) -> Option<&[String]> {
        self.components
            .last()
            .and_then(|c| c.template_args.as_deref())
    }

    /// Whether the name has a single component.
    pub fn is_simple(&self) -> bool {
        self.components.len() == 1
    }
}

/// Parse type text or a mention.
pub fn parse_type_name(input: &str) -> Result<TypeName, NameError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(NameError {
            input: input.to_string(),
            message: "empty name".to_string(),
        });
    }
    parse_name.parse(trimmed).map_err(|e| NameError {
        input: input.to_string(),
        message: format!("{:?}", e),
    })
}

/// Whether `text` denotes a fundamental type (`int`, `const char*`, ...).
pub fn is_fundamental(text: &str) -> bool {
    parse_type_name(text).is_ok_and(|n| n.fundamental)
}

/// Split a bracket group's contents at top-level commas, normalizing each
/// piece. `void` alone counts as an empty list.
pub fn split_args(inner: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, ch) in inner.char_indices() {
        match ch {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                args.push(normalize_type_text(&inner[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    args.push(normalize_type_text(&inner[start..]));
    args.retain(|a| !a.is_empty());
    if args.len() == 1 && args[0] == "void" {
        args.clear();
    }
    args
}

// ============================================================================
// Parser implementation using winnow
// ============================================================================

fn parse_name(input: &mut &str) -> ModalResult<TypeName> {
    let _: Vec<()> = repeat(0.., terminated(prefix_keyword, multispace0)).parse_next(input)?;

    let builtin: Vec<&str> =
        repeat(0.., terminated(builtin_word, multispace0)).parse_next(input)?;

    let (global, components, fundamental) = if builtin.is_empty() {
        let global = opt(("::", multispace0)).parse_next(input)?.is_some();
        let components: Vec<NameComponent> =
            separated(1.., component, (multispace0, "::", multispace0)).parse_next(input)?;
        (global, components, false)
    } else {
        let component = NameComponent {
            ident: builtin.join(" "),
            template_args: None,
        };
        (false, vec![component], true)
    };

    let _: Vec<()> = repeat(0.., suffix).parse_next(input)?;
    let params = opt(paren_group.map(split_args)).parse_next(input)?;
    let _: Vec<()> = repeat(0.., suffix).parse_next(input)?;
    let _ = multispace0.parse_next(input)?;

    Ok(TypeName {
        global,
        components,
        params,
        fundamental,
    })
}

/// Parse one name component.
fn component(input: &mut &str) -> ModalResult<NameComponent> {
    alt((operator_name, plain_component)).parse_next(input)
}

fn plain_component(input: &mut &str) -> ModalResult<NameComponent> {
    let ident: &str = take_while(1.., |c: char| c.is_alphanumeric() || c == '_' || c == '~')
        .parse_next(input)?;
    let template_args = opt(preceded(multispace0, angle_group.map(split_args))).parse_next(input)?;
    Ok(NameComponent {
        ident: ident.to_string(),
        template_args,
    })
}

/// `operator==`, `operator()`, `operator[]`, ...
fn operator_name(input: &mut &str) -> ModalResult<NameComponent> {
    let checkpoint = *input;
    let w = word(input)?;
    if w != "operator" {
        *input = checkpoint;
        return Err(ErrMode::from_input(input));
    }
    let _ = multispace0.parse_next(input)?;
    let symbol: &str = alt((
        "()",
        "[]",
        take_while(1.., |c: char| "+-*/%^&|~!=<>,".contains(c)),
    ))
    .parse_next(input)?;
    Ok(NameComponent {
        ident: format!("operator{}", symbol),
        template_args: None,
    })
}

/// Declarator noise after the name.
fn suffix(input: &mut &str) -> ModalResult<()> {
    let _ = multispace0.parse_next(input)?;
    alt((
        "&&".void(),
        "&".void(),
        "*".void(),
        delimited('[', take_till(0.., |c: char| c == ']'), ']').void(),
        cv_keyword,
    ))
    .parse_next(input)?;
    let _ = multispace0.parse_next(input)?;
    Ok(())
}

fn word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    take_while(1.., |c: char| c.is_alphanumeric() || c == '_').parse_next(input)
}

fn keyword_from(input: &mut &str, words: &[&str]) -> ModalResult<()> {
    let checkpoint = *input;
    let w = word(input)?;
    if words.contains(&w) {
        Ok(())
    } else {
        *input = checkpoint;
        Err(ErrMode::from_input(input))
    }
}

fn prefix_keyword(input: &mut &str) -> ModalResult<()> {
    keyword_from(input, PREFIX_WORDS)
}

fn cv_keyword(input: &mut &str) -> ModalResult<()> {
    keyword_from(input, CV_WORDS)
}

fn builtin_word<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    let checkpoint = *input;
    let w = word(input)?;
    if BUILTIN_WORDS.contains(&w) {
        Ok(w)
    } else {
        *input = checkpoint;
        Err(ErrMode::from_input(input))
    }
}

fn angle_group<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    bracket_group(input, '<', '>')
}

fn paren_group<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    bracket_group(input, '(', ')')
}

/// Take a balanced bracket group, returning its contents.
///
/// All bracket kinds nest together, so `<std::function<void(int)>>` is one
/// group.
fn bracket_group<'i>(input: &mut &'i str, open: char, close: char) -> ModalResult<&'i str> {
    let text: &'i str = *input;
    if !text.starts_with(open) {
        return Err(ErrMode::from_input(input));
    }
    let mut depth = 0usize;
    for (i, ch) in text.char_indices() {
        match ch {
            '<' | '(' | '[' => depth += 1,
            '>' | ')' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    if ch != close {
                        return Err(ErrMode::from_input(input));
                    }
                    let inner = &text[open.len_utf8()..i];
                    *input = &text[i + ch.len_utf8()..];
                    return Ok(inner);
                }
            }
            _ => {}
        }
    }
    Err(ErrMode::from_input(input))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> TypeName {
        parse_type_name(s).unwrap_or_else(|e| panic!("{}", e))
    }

    mod type_text_tests {
        use super::*;

        #[test]
        fn simple_identifier() {
            let name = parse("Widget");
            assert!(!name.global);
            assert_eq!(name.lookup_key(), "Widget");
            assert!(name.params.is_none());
            assert!(!name.fundamental);
        }

        #[test]
        fn strips_cv_and_declarators() {
            assert_eq!(parse("const ui::Widget &").lookup_key(), "ui::Widget");
            assert_eq!(parse("ui::Widget const*").lookup_key(), "ui::Widget");
            assert_eq!(parse("Widget&&").lookup_key(), "Widget");
            assert_eq!(parse("volatile Widget * const").lookup_key(), "Widget");
            assert_eq!(parse("Widget[16]").lookup_key(), "Widget");
        }

        #[test]
        fn strips_elaborated_keywords() {
            assert_eq!(parse("struct Point").lookup_key(), "Point");
            assert_eq!(parse("typename T::value_type").lookup_key(), "T::value_type");
            assert_eq!(parse("enum class_id").lookup_key(), "class_id");
        }

        #[test]
        fn global_qualifier() {
            let name = parse("::ui::Widget");
            assert!(name.global);
            assert_eq!(name.lookup_key(), "ui::Widget");
        }

        #[test]
        fn template_arguments_are_kept_per_component() {
            let name = parse("const std::map<std::string, std::vector< int > >&");
            assert_eq!(name.lookup_key(), "std::map");
            assert_eq!(
                name.template_args().unwrap(),
                &["std::string".to_string(), "std::vector<int>".to_string()]
            );
        }

        #[test]
        fn nested_function_type_argument() {
            let name = parse("std::function<void(int, double)>");
            assert_eq!(name.template_args().unwrap(), &["void(int,double)".to_string()]);
        }

        #[test]
        fn fundamentals() {
            assert!(is_fundamental("int"));
            assert!(is_fundamental("unsigned long long"));
            assert!(is_fundamental("const char*"));
            assert!(is_fundamental("double &"));
            assert!(!is_fundamental("int_fast32_t"));
            assert!(!is_fundamental("Widget"));
            assert!(!is_fundamental("std::size_t"));
        }

        #[test]
        fn keyword_prefix_of_identifier_is_not_a_keyword() {
            assert_eq!(parse("constant_t").lookup_key(), "constant_t");
            assert_eq!(parse("classic::Car").lookup_key(), "classic::Car");
        }
    }

    mod mention_tests {
        use super::*;

        #[test]
        fn parameter_list() {
            let name = parse("ns::bar(int, const Widget &)");
            assert_eq!(name.lookup_key(), "ns::bar");
            assert_eq!(
                name.params.unwrap(),
                vec!["int".to_string(), "const Widget&".to_string()]
            );
        }

        #[test]
        fn empty_and_void_parameter_lists() {
            assert_eq!(parse("f()").params.unwrap(), Vec::<String>::new());
            assert_eq!(parse("f(void)").params.unwrap(), Vec::<String>::new());
        }

        #[test]
        fn const_member_function_mention() {
            let name = parse("Widget::size() const");
            assert_eq!(name.lookup_key(), "Widget::size");
            assert_eq!(name.params.unwrap().len(), 0);
        }

        #[test]
        fn operators() {
            assert_eq!(parse("operator==").lookup_key(), "operator==");
            assert_eq!(parse("Widget::operator()").lookup_key(), "Widget::operator()");
            let call = parse("Matrix::operator()(int, int)");
            assert_eq!(call.lookup_key(), "Matrix::operator()");
            assert_eq!(call.params.unwrap().len(), 2);
        }

        #[test]
        fn destructor() {
            assert_eq!(parse("Widget::~Widget").lookup_key(), "Widget::~Widget");
        }
    }

    mod error_tests {
        use super::*;

        #[test]
        fn empty_input_is_an_error() {
            assert!(parse_type_name("   ").is_err());
        }

        #[test]
        fn function_pointer_is_an_error() {
            assert!(parse_type_name("void (*)(int)").is_err());
        }

        #[test]
        fn unbalanced_template_is_an_error() {
            assert!(parse_type_name("std::vector<int").is_err());
        }

        #[test]
        fn split_args_handles_nesting() {
            assert_eq!(
                split_args("A<B, C>, D(E, F), G"),
                vec!["A<B,C>".to_string(), "D(E,F)".to_string(), "G".to_string()]
            );
        }
    }
}
