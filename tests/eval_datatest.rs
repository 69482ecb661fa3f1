use datatest_stable::Utf8Path;
use kestrel::{Error, Runtime};

#[derive(thiserror::Error, Debug)]
#[error("evaluation datatest failed at {0}")]
pub struct DatatestError(Box<Utf8Path>);

/// A test file: expected errors, `---`, expected values (one line per top-level
/// form), `---`, then the source. Lines starting with `;` before the source are
/// comments.
#[derive(Debug, Default)]
struct Datatest<'a> {
    comments: Vec<&'a str>,
    errors: Vec<&'a str>,
    values: Vec<&'a str>,
    source: String,
}

impl<'a> Datatest<'a> {
    fn parse(contents: &'a str) -> Self {
        #[derive(PartialEq, Eq, Debug, Default)]
        enum Section {
            #[default]
            Errors,
            Values,
            Source,
        }
        let mut section = Section::default();
        let mut test = Self::default();

        for line in contents.lines() {
            if section != Section::Source && line.trim_start().starts_with(';') {
                test.comments.push(line);
                continue;
            }
            match section {
                Section::Errors if line.trim_end() == "---" => section = Section::Values,
                Section::Errors => test.errors.push(line),
                Section::Values if line.trim_end() == "---" => section = Section::Source,
                Section::Values => test.values.push(line),
                Section::Source => {
                    if !test.source.is_empty() {
                        test.source.push('\n');
                    }
                    test.source.push_str(line);
                }
            }
        }
        test
    }

    /// Rewrites the test with new expectations, comments first
    fn stitch(&self, errors: &[String], values: &[String]) -> String {
        let mut lines: Vec<&str> = self.comments.clone();
        lines.extend(errors.iter().map(String::as_str));
        lines.push("---");
        lines.extend(values.iter().map(String::as_str));
        lines.push("---");
        lines.extend(self.source.lines());
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn describe(err: &Error) -> String {
    match err.span() {
        Some(span) => format!("[{span:?}] {err}"),
        None => err.to_string(),
    }
}

/// Evaluates `source` form by form, stopping at the first error
fn evaluate(source: &str) -> (Vec<String>, Vec<String>) {
    let mut runtime = Runtime::new();
    let mut values = vec![];
    let forms = match runtime.read(source) {
        Ok(forms) => forms,
        Err(err) => return (vec![describe(&err)], values),
    };
    for form in forms {
        match runtime.compile(&form).and_then(|def| runtime.run(def)) {
            Ok(value) => values.push(runtime.world().display(&value)),
            Err(err) => return (vec![describe(&err)], values),
        }
    }
    (vec![], values)
}

fn eval_test(path: &Utf8Path, contents: String) -> datatest_stable::Result<()> {
    let test = Datatest::parse(&contents);
    let (errors, values) = evaluate(&test.source);

    let mut mismatched = false;
    let expected_values = test.values.iter().map(|line| line.trim());
    if !expected_values.clone().eq(values.iter().map(String::as_str)) {
        println!(
            "error in {path}: mismatched values\n\nGot:\n{}\n\nExpected:\n{}",
            values.join("\n"),
            expected_values.collect::<Vec<_>>().join("\n")
        );
        mismatched = true;
    }
    let expected_errors = test.errors.iter().map(|line| line.trim());
    if !expected_errors.clone().eq(errors.iter().map(String::as_str)) {
        println!(
            "error in {path}: mismatched errors\n\nGot:\n{}\n\nExpected:\n{}",
            errors.join("\n"),
            expected_errors.collect::<Vec<_>>().join("\n")
        );
        mismatched = true;
    }

    if std::env::var("DATATEST_EXPECT").is_ok() {
        std::fs::write(path, test.stitch(&errors, &values))?;
        Ok(())
    } else if mismatched {
        Err(DatatestError(Box::from(path)))?
    } else {
        Ok(())
    }
}

datatest_stable::harness! {
    eval_test, "test_data", r"^.*\.kst",
}
