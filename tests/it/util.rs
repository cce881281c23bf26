//! Test utilities, including the data-driven test case DSL
//!
//! A test case file is a sequence of `title + code` headers and expected outputs, separated by lines
//! of 40 hyphens. Header lines starting with `//` are ignored.

use std::fmt::{self, Write};

pub type TestResult<T = ()> = Result<T, TestError>;

/// Parsed test case
#[derive(Debug, Clone)]
pub struct Test {
    pub title: String,
    pub code: String,
    pub expected: String,
}

impl Test {
    pub fn result(self, output: &str) -> TestResult {
        // compared trimmed
        if output.trim() == self.expected.trim() {
            Ok(())
        } else {
            Err(TestError {
                test: self,
                output: output.to_string(),
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct TestError {
    pub test: Test,
    pub output: String,
}

impl fmt::Display for TestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}
--- code:
{}
--- output:
{}
--- expected:
{}",
            self.test.title,
            self.test.code,
            self.output,
            self.test.expected.trim(),
        )
    }
}

pub fn run_tests(src: &str, runner: fn(Test) -> TestResult) {
    let tests = self::collect_tests(src);
    assert!(!tests.is_empty(), "no test case found");

    let errs = tests
        .into_iter()
        .filter_map(|t| runner(t).err())
        .collect::<Vec<_>>();

    if errs.is_empty() {
        return;
    }

    let mut s = String::new();
    writeln!(s, "Errors:").unwrap();
    for e in &errs {
        writeln!(s, "{}", e).unwrap();
        writeln!(s).unwrap();
    }

    panic!("{}", s);
}

pub fn collect_tests(src: &str) -> Vec<Test> {
    let mut chunks = {
        // 40 hyphens
        let delim = r#"----------------------------------------"#;
        src.split(delim)
    };

    let mut tests = vec![];
    while let Some(header) = chunks.next() {
        let expected = match chunks.next() {
            Some(block) => block,
            None => break,
        };

        let mut header = header
            .lines()
            .filter(|ln| !ln.starts_with("//"))
            .skip_while(|ln| ln.trim().is_empty());

        // first line: title
        let title = match header.next() {
            Some(t) => t,
            None => break,
        };

        // other lines: code
        let code = header.collect::<Vec<&str>>().join("\n");

        tests.push(Test {
            title: title.trim().to_string(),
            code: code.trim().to_string(),
            expected: expected.to_string(),
        });
    }

    tests
}

#[test]
fn collect() {
    let src = "\
// comment
first
(+ 1 2)
----------------------------------------
3
----------------------------------------
second
----------------------------------------
false
";
    let tests = collect_tests(src);
    assert_eq!(tests.len(), 2);
    assert_eq!(tests[0].title, "first");
    assert_eq!(tests[0].code, "(+ 1 2)");
    assert_eq!(tests[0].expected.trim(), "3");
    assert_eq!(tests[1].code, "");
    assert_eq!(tests[1].expected.trim(), "false");
}
