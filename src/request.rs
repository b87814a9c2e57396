use std::fs;
use std::path::{Path, PathBuf};

use crate::coerce::TypeToken;
use crate::error::Failure;

/// The contents of a descriptor file.
///
/// ```text
/// // lines starting with "//" or "-" are ignored
/// demo.jar
/// demo.Calculator
/// add
/// int int
/// 3
/// 4
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRequest {
    pub archive_path: PathBuf,
    pub type_name: String,
    pub method_name: String,
    pub param_tokens: Vec<String>,
    pub values: Vec<String>,
}

impl InvocationRequest {
    pub fn read(path: &Path) -> Result<InvocationRequest, Failure> {
        let text = fs::read_to_string(path).map_err(|error| Failure::DescriptorIo {
            path: path.to_owned(),
            error,
        })?;
        InvocationRequest::parse(&text)
    }

    pub fn parse(text: &str) -> Result<InvocationRequest, Failure> {
        let lines: Vec<&str> = text
            .lines()
            .filter(|line| !line.starts_with("//") && !line.starts_with('-'))
            .collect();

        let [archive, type_name, method_name, tokens, values @ ..] = lines.as_slice() else {
            return Err(Failure::DescriptorTooShort { found: lines.len() });
        };

        Ok(InvocationRequest {
            archive_path: PathBuf::from(archive.trim()),
            type_name: type_name.trim().to_owned(),
            method_name: method_name.trim().to_owned(),
            param_tokens: tokens.split_whitespace().map(str::to_owned).collect(),
            values: values.iter().map(|value| (*value).to_owned()).collect(),
        })
    }

    pub fn tokens(&self) -> Vec<TypeToken> {
        self.param_tokens
            .iter()
            .map(|token| TypeToken::from_token(token))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fields_and_skips_comments() {
        let request = InvocationRequest::parse(
            "// calculator\n\
             demo.jar\n\
             - separator\n\
             demo.Calculator\n\
             add\n\
             int Int\n\
             3\n\
             //4\n\
             4\n",
        )
        .unwrap();

        assert_eq!(request.archive_path, PathBuf::from("demo.jar"));
        assert_eq!(request.type_name, "demo.Calculator");
        assert_eq!(request.method_name, "add");
        assert_eq!(request.param_tokens, ["int", "Int"]);
        assert_eq!(request.values, ["3", "4"]);
        assert_eq!(request.tokens(), [TypeToken::Int, TypeToken::Int]);
    }

    #[test]
    fn blank_token_line_means_no_parameters() {
        let request = InvocationRequest::parse("a.jar\ndemo.A\nping\n\n").unwrap();
        assert!(request.param_tokens.is_empty());
        assert!(request.values.is_empty());
    }

    #[test]
    fn values_keep_their_text() {
        let request = InvocationRequest::parse("a.jar\ndemo.A\necho\nstring\n  padded \n").unwrap();
        assert_eq!(request.values, ["  padded "]);
    }

    #[test]
    fn short_descriptors_are_rejected() {
        let failure = InvocationRequest::parse("// nothing\na.jar\ndemo.A\n").unwrap_err();
        assert!(matches!(failure, Failure::DescriptorTooShort { found: 2 }));
    }

    #[test]
    fn missing_files_are_io_failures() {
        let failure = InvocationRequest::read(Path::new("/nonexistent/descriptor.txt")).unwrap_err();
        assert!(matches!(failure, Failure::DescriptorIo { .. }));
    }
}
