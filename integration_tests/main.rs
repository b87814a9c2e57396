mod assembler;
mod fixtures;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use jar_invoker::pipeline;
use libtest_mimic::{Arguments, Failed, Trial};
use tempfile::TempDir;

fn main() {
    let args = Arguments::from_args();

    let tests = vec![
        Trial::test("static_int_method", static_int_method),
        Trial::test("instance_methods_get_a_fresh_receiver", instance_methods_get_a_fresh_receiver),
        Trial::test("wide_and_floating_values", wide_and_floating_values),
        Trial::test("large_doubles_use_scientific_notation", large_doubles_use_scientific_notation),
        Trial::test("loops_and_arrays", loops_and_arrays),
        Trial::test("string_builder", string_builder),
        Trial::test("chars_and_booleans", chars_and_booleans),
        Trial::test("string_concatenation", string_concatenation),
        Trial::test("null_arguments", null_arguments),
        Trial::test("null_for_a_primitive", null_for_a_primitive),
        Trial::test("object_results_use_to_string", object_results_use_to_string),
        Trial::test("void_methods", void_methods),
        Trial::test("guest_output_precedes_the_report", guest_output_precedes_the_report),
        Trial::test("comments_are_ignored", comments_are_ignored),
        Trial::test("static_initializers_run_first", static_initializers_run_first),
        Trial::test("inherited_methods", inherited_methods),
        Trial::test("hidden_fields_keep_their_own_slots", hidden_fields_keep_their_own_slots),
        Trial::test("deep_recursion", deep_recursion),
        Trial::test("uncaught_exceptions", uncaught_exceptions),
        Trial::test("caught_exceptions", caught_exceptions),
        Trial::test("receiver_construction_failures", receiver_construction_failures),
        Trial::test("resolution_failures", resolution_failures),
        Trial::test("argument_failures", argument_failures),
        Trial::test("descriptor_failures", descriptor_failures),
        Trial::test("cli_usage", cli_usage),
        Trial::test("cli_exit_status", cli_exit_status),
    ];

    libtest_mimic::run(&args, tests).exit();
}

/// A temporary directory holding the fixture archive.
struct Workspace {
    dir: TempDir,
    jar: PathBuf,
}

impl Workspace {
    fn new() -> Result<Workspace, Failed> {
        let dir = tempfile::tempdir()?;
        let jar = dir.path().join("demo.jar");
        fixtures::write_jar(&jar)?;
        Ok(Workspace { dir, jar })
    }

    /// Writes a descriptor file whose first line names the fixture archive.
    fn descriptor(&self, name: &str, lines: &str) -> Result<PathBuf, Failed> {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("{}\n{lines}", self.jar.display()))?;
        Ok(path)
    }

    /// Runs a descriptor and returns everything a user would see on stdout.
    fn invoke(&self, lines: &str) -> Result<String, Failed> {
        let path = self.descriptor("descriptor.txt", lines)?;
        Ok(run(&path))
    }
}

fn run(path: &Path) -> String {
    let mut stdout = Vec::new();
    let result = pipeline::run(path, &mut stdout);

    let mut output = String::from_utf8_lossy(&stdout).into_owned();
    match result {
        Ok(report) => output.push_str(&report.to_string()),
        Err(failure) => output.push_str(&failure.summary()),
    }
    output
}

fn static_int_method() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nadd\nint int\n3\n4\n")?, @r###"
    demo.Calculator add executed successfully.
    Return value: 7
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nadd\nInteger INT\n12\n+4\n")?, @r###"
    demo.Calculator add executed successfully.
    Return value: 16
    "###);

    Ok(())
}

fn instance_methods_get_a_fresh_receiver() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nmultiply\nint int\n6\n7\n")?, @r###"
    demo.Calculator multiply executed successfully.
    Return value: 42
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\naddToTotal\nint\n5\n")?, @r###"
    demo.Calculator addToTotal executed successfully.
    Return value: 15
    "###);

    Ok(())
}

fn wide_and_floating_values() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nsquare\nlong\n3000000000\n")?, @r###"
    demo.Calculator square executed successfully.
    Return value: 9000000000000000000
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nhalf\ndouble\n5\n")?, @r###"
    demo.Calculator half executed successfully.
    Return value: 2.5
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nscale\nfloat float\n1.5\n2\n")?, @r###"
    demo.Calculator scale executed successfully.
    Return value: 3.0
    "###);

    Ok(())
}

fn large_doubles_use_scientific_notation() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nbig\ndouble\n1\n")?, @r###"
    demo.Calculator big executed successfully.
    Return value: 1.0E10
    "###);

    Ok(())
}

fn loops_and_arrays() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nsumTo\nint\n100\n")?, @r###"
    demo.Calculator sumTo executed successfully.
    Return value: 5050
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nsquares\nint\n4\n")?, @r###"
    demo.Calculator squares executed successfully.
    Return value: 13
    "###);

    Ok(())
}

fn string_builder() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\ngreet\nString\nWorld\n")?, @r###"
    demo.Calculator greet executed successfully.
    Return value: Hello, World!
    "###);

    Ok(())
}

fn chars_and_booleans() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\ninitial\nstring\nxyz\n")?, @r###"
    demo.Calculator initial executed successfully.
    Return value: x
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\ncharCode\nchar\nABC\n")?, @r###"
    demo.Calculator charCode executed successfully.
    Return value: 65
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nisEven\nint\n4\n")?, @r###"
    demo.Calculator isEven executed successfully.
    Return value: true
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nnegate\nboolean\nTRUE\n")?, @r###"
    demo.Calculator negate executed successfully.
    Return value: false
    "###);

    // Anything other than "true" is false.
    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nnegate\nbool\nyes\n")?, @r###"
    demo.Calculator negate executed successfully.
    Return value: true
    "###);

    Ok(())
}

fn string_concatenation() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\ndescribe\nstring int\napples\n3\n")?,
        @r###"
    demo.Calculator describe executed successfully.
    Return value: apples has 3 items
    "###
    );

    Ok(())
}

fn null_arguments() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\necho\nstring\nnull\n")?, @r###"
    demo.Calculator echo executed successfully.
    Return value: null
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nisNull\nObject\nnull\n")?, @r###"
    demo.Calculator isNull executed successfully.
    Return value: true
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nisNull\njava.lang.Object\nthing\n")?, @r###"
    demo.Calculator isNull executed successfully.
    Return value: false
    "###);

    Ok(())
}

fn null_for_a_primitive() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nadd\nint int\nnull\n4\n")?,
        @"Invocation failure while invoking the method: java.lang.IllegalArgumentException: null is not a valid int argument"
    );

    Ok(())
}

fn object_results_use_to_string() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nself\n\n")?, @r###"
    demo.Calculator self executed successfully.
    Return value: Calculator(total=10)
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nnothing\n\n")?, @r###"
    demo.Calculator nothing executed successfully.
    Return value: null
    "###);

    Ok(())
}

fn void_methods() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nping\n\n")?, @r###"
    demo.Calculator ping executed successfully.
    Method executed successfully.
    "###);

    Ok(())
}

fn guest_output_precedes_the_report() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nshout\nstring\nhi there\n")?, @r###"
    hi there
    demo.Calculator shout executed successfully.
    Method executed successfully.
    "###);

    Ok(())
}

fn comments_are_ignored() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    let lines = "// which class\n\
                 demo.Calculator\n\
                 - and method\n\
                 add\n\
                 int int\n\
                 //1\n\
                 2\n\
                 5\n";
    insta::assert_snapshot!(workspace.invoke(lines)?, @r###"
    demo.Calculator add executed successfully.
    Return value: 7
    "###);

    Ok(())
}

fn static_initializers_run_first() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Counter\nnext\n\n")?, @r###"
    demo.Counter next executed successfully.
    Return value: 42
    "###);

    Ok(())
}

fn inherited_methods() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Derived\nhello\n\n")?, @r###"
    demo.Derived hello executed successfully.
    Return value: hello from base
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Polite\ngreet\n\n")?, @r###"
    demo.Polite greet executed successfully.
    Return value: hi from default
    "###);

    insta::assert_snapshot!(
        workspace.invoke("demo.Polite\nmake\n\n")?,
        @"Resolution failure while resolving the method: no public method demo.Polite.make()"
    );

    Ok(())
}

fn hidden_fields_keep_their_own_slots() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Child\nboth\n\n")?, @r###"
    demo.Child both executed successfully.
    Return value: 21
    "###);

    Ok(())
}

fn deep_recursion() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Recursion\ndepth\nint\n1500\n")?, @r###"
    demo.Recursion depth executed successfully.
    Return value: 1500
    "###);

    insta::assert_snapshot!(
        workspace.invoke("demo.Recursion\nforever\nint\n1\n")?,
        @"Invocation failure while invoking the method: java.lang.StackOverflowError"
    );

    Ok(())
}

fn uncaught_exceptions() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\ndivide\nint int\n1\n0\n")?,
        @"Invocation failure while invoking the method: java.lang.ArithmeticException: / by zero"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Failing\nfail\n\n")?,
        @"Invocation failure while invoking the method: java.lang.IllegalStateException: boom"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nparse\nstring\nabc\n")?,
        @r###"Invocation failure while invoking the method: java.lang.NumberFormatException: For input string: "abc""###
    );

    Ok(())
}

fn caught_exceptions() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nsafeDivide\nint int\n1\n0\n")?, @r###"
    demo.Calculator safeDivide executed successfully.
    Return value: -1
    "###);

    insta::assert_snapshot!(workspace.invoke("demo.Calculator\nparse\nstring\n123\n")?, @r###"
    demo.Calculator parse executed successfully.
    Return value: 123
    "###);

    Ok(())
}

fn receiver_construction_failures() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(
        workspace.invoke("demo.NoDefault\nvalue\n\n")?,
        @"Resolution failure while resolving the method: cannot construct an instance of demo.NoDefault: no public no-argument constructor"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Shape\narea\n\n")?,
        @"Resolution failure while resolving the method: cannot construct an instance of demo.Shape: it is abstract"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Fragile\nvalue\n\n")?,
        @"Resolution failure while resolving the method: cannot construct an instance of demo.Fragile: java.lang.IllegalStateException: ctor boom"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Hidden\nvalue\n\n")?,
        @"Resolution failure while resolving the method: cannot construct an instance of demo.Hidden: no public no-argument constructor"
    );

    Ok(())
}

fn resolution_failures() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(
        workspace.invoke("demo.Missing\nrun\n\n")?,
        @"Resolution failure while resolving the method: type demo.Missing was not found"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo/Missing\nrun\n\n")?,
        @"Resolution failure while resolving the method: type demo/Missing was not found"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nadd\nint\n3\n")?,
        @"Resolution failure while resolving the method: no public method demo.Calculator.add(int)"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nadd\nlong long\n3\n4\n")?,
        @"Resolution failure while resolving the method: no public method demo.Calculator.add(long,long)"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nsecret\n\n")?,
        @"Resolution failure while resolving the method: no public method demo.Calculator.secret()"
    );

    Ok(())
}

fn argument_failures() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nadd\nint int\n3\n")?,
        @"Input validation failure while coercing arguments: The number of method arguments and parameters are not matched (expected 2, found 1)"
    );

    // `shout` prints its argument, so any guest output would show up here.
    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nshout\nstring\n")?,
        @"Input validation failure while coercing arguments: The number of method arguments and parameters are not matched (expected 1, found 0)"
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nadd\nint int\nthree\n4\n")?,
        @r###"Coercion failure while coercing arguments: argument 1 ("three") is not a valid int: For input string: "three""###
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\nadd\nint int\n1\n2147483648\n")?,
        @r###"Coercion failure while coercing arguments: argument 2 ("2147483648") is not a valid int: For input string: "2147483648""###
    );

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\ncharCode\nchar\n\n")?,
        @r###"Coercion failure while coercing arguments: argument 1 ("") is not a valid char: Index 0 out of bounds for length 0"###
    );

    Ok(())
}

fn descriptor_failures() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    insta::assert_snapshot!(
        workspace.invoke("demo.Calculator\n")?,
        @"Input validation failure while reading the descriptor: descriptor file has 2 field lines, expected at least 4"
    );

    let path = workspace.dir.path().join("missing-archive.txt");
    fs::write(&path, "does-not-exist.jar\ndemo.Calculator\nping\n\n")?;
    insta::assert_snapshot!(
        run(&path),
        @"Resolution failure while resolving the method: archive does-not-exist.jar does not exist"
    );

    let path = workspace.dir.path().join("not-a-jar.txt");
    fs::write(&path, format!("{}\ndemo.Calculator\nping\n\n", path.display()))?;
    let output = run(&path);
    assert!(
        output.starts_with("Resolution failure while resolving the method: archive "),
        "{output}"
    );
    assert!(output.contains("is not a readable jar"), "{output}");

    Ok(())
}

fn cli_usage() -> Result<(), Failed> {
    let output = Command::new(env!("CARGO_BIN_EXE_invoke")).output()?;

    assert!(output.status.success());
    insta::assert_snapshot!(String::from_utf8(output.stdout)?, @"Usage: invoke <descriptor-file-path>");

    Ok(())
}

fn cli_exit_status() -> Result<(), Failed> {
    let workspace = Workspace::new()?;

    let path = workspace.descriptor("add.txt", "demo.Calculator\nadd\nint int\n3\n4\n")?;
    let output = Command::new(env!("CARGO_BIN_EXE_invoke")).arg(&path).output()?;
    assert!(output.status.success());
    insta::assert_snapshot!(String::from_utf8(output.stdout)?, @r###"
    demo.Calculator add executed successfully.
    Return value: 7
    "###);

    let path = workspace.descriptor("divide.txt", "demo.Calculator\ndivide\nint int\n1\n0\n")?;
    let output = Command::new(env!("CARGO_BIN_EXE_invoke")).arg(&path).output()?;
    assert!(!output.status.success());
    insta::assert_snapshot!(
        String::from_utf8(output.stdout)?,
        @"Invocation failure while invoking the method: java.lang.ArithmeticException: / by zero"
    );

    Ok(())
}
