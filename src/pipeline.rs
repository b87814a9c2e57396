//! The invocation pipeline: descriptor → archive → method → arguments →
//! invocation → report.

use std::fmt::{self, Display};
use std::io::Write;
use std::path::Path;
use std::{panic, thread};

use bumpalo::Bump;
use color_eyre::eyre::eyre;
use tracing::debug;

use crate::archive::Archive;
use crate::call_frame::{JvmValue, Trap};
use crate::class::{Class, Method};
use crate::class_file::MethodAccessFlags;
use crate::coerce::{self, Argument, TypeToken};
use crate::error::{self, Failure};
use crate::format;
use crate::jdk;
use crate::request::InvocationRequest;
use crate::vm::{ClassNotFound, Vm};

/// Progress of a run. Each variant is the state reached once its step
/// succeeds; the display text names that step.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
pub enum Stage {
    #[strum(to_string = "starting")]
    Start,
    #[strum(to_string = "reading the descriptor")]
    DescriptorRead,
    #[strum(to_string = "resolving the method")]
    Resolved,
    #[strum(to_string = "coercing arguments")]
    ArgsCoerced,
    #[strum(to_string = "invoking the method")]
    Invoked,
    #[strum(to_string = "reporting the result")]
    Reported,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Void,
    Value(String),
}

/// What a successful run prints.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub type_name: String,
    pub method_name: String,
    pub outcome: Outcome,
}

impl Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} executed successfully.", self.type_name, self.method_name)?;
        match &self.outcome {
            Outcome::Void => write!(f, "Method executed successfully."),
            Outcome::Value(text) => write!(f, "Return value: {text}"),
        }
    }
}

/// Host stack for the thread that runs the engine. Every guest call nests a
/// host call, so this bounds how close to `MAX_CALL_DEPTH` a guest can get.
const ENGINE_STACK_SIZE: usize = 512 * 1024 * 1024;

/// Runs the descriptor file at `path`. Anything the invoked code prints goes
/// to `out`.
pub fn run(path: &Path, out: &mut (dyn Write + Send)) -> Result<Report, Failure> {
    debug!(stage = %Stage::Start, path = %path.display());
    let request = InvocationRequest::read(path)?;
    execute(&request, out)
}

/// Runs `request` on a dedicated engine thread and waits for it.
pub fn execute(
    request: &InvocationRequest,
    out: &mut (dyn Write + Send),
) -> Result<Report, Failure> {
    thread::scope(|scope| {
        let engine = thread::Builder::new()
            .name("engine".to_owned())
            .stack_size(ENGINE_STACK_SIZE)
            .spawn_scoped(scope, || execute_here(request, out))
            .map_err(|error| {
                Failure::Invocation(format!("cannot start the engine thread: {error}"))
            })?;
        engine.join().unwrap_or_else(|payload| panic::resume_unwind(payload))
    })
}

fn execute_here(request: &InvocationRequest, out: &mut dyn Write) -> Result<Report, Failure> {
    debug!(
        stage = %Stage::DescriptorRead,
        archive = %request.archive_path.display(),
        type_name = %request.type_name,
        method = %request.method_name,
    );

    let tokens = request.tokens();
    let mut archive = Archive::open(&request.archive_path)?;
    let arena = Bump::new();
    let mut vm = Vm::new(&arena, &mut archive, out);

    let target = resolve(&mut vm, request, &tokens)?;
    debug!(
        stage = %Stage::Resolved,
        declaring = target.declaring.name(),
        descriptor = target.method.descriptor,
    );

    let arguments = coerce::coerce_all(&tokens, &request.values)?;
    debug!(stage = %Stage::ArgsCoerced, count = arguments.len());

    let outcome = invoke(&mut vm, &target, &arguments)?;
    debug!(stage = %Stage::Invoked, ?outcome);

    let report = Report {
        type_name: request.type_name.clone(),
        method_name: request.method_name.clone(),
        outcome,
    };
    debug!(stage = %Stage::Reported);

    Ok(report)
}

struct Target<'a> {
    declaring: &'a Class<'a>,
    method: &'a Method<'a>,
    receiver: Option<usize>,
}

fn resolve<'a>(
    vm: &mut Vm<'a>,
    request: &InvocationRequest,
    tokens: &[TypeToken],
) -> Result<Target<'a>, Failure> {
    let type_name = &request.type_name;
    let class = vm
        .load_class(&type_name.replace('.', "/"))
        .map_err(|report| match report.downcast_ref::<ClassNotFound>() {
            Some(missing) if missing.0 == type_name.replace('/', ".") => {
                Failure::TypeNotFound(type_name.clone())
            }
            _ => Failure::TypeLoad {
                name: type_name.clone(),
                reason: error::describe(&report),
            },
        })?;

    let params = coerce::params_descriptor(tokens);
    let name = request.method_name.as_str();
    let matches = |method: &&Method| {
        method.access_flags.contains(MethodAccessFlags::PUBLIC)
            && method.descriptor.starts_with(&params)
    };
    let (declaring, method) = class
        .ancestors()
        .find_map(|ancestor| {
            ancestor
                .methods_named(name)
                .find(matches)
                .map(|method| (ancestor, method))
        })
        .or_else(|| {
            // Inherited default methods; static interface methods are not members.
            let descriptor = class
                .superinterfaces()
                .into_iter()
                .flat_map(|interface| interface.methods_named(name))
                .find(|method| {
                    matches(method) && !method.access_flags.contains(MethodAccessFlags::STATIC)
                })?
                .descriptor;
            class.resolve_method(name, descriptor)
        })
        .ok_or_else(|| Failure::MethodNotFound {
            signature: format!(
                "{type_name}.{}({})",
                request.method_name,
                coerce::params_signature(tokens)
            ),
        })?;

    let receiver = if method.access_flags.contains(MethodAccessFlags::STATIC) {
        None
    } else {
        Some(construct(vm, class, type_name)?)
    };

    Ok(Target {
        declaring,
        method,
        receiver,
    })
}

/// Creates the receiver for an instance method through the public no-argument
/// constructor.
fn construct<'a>(vm: &mut Vm<'a>, class: &'a Class<'a>, type_name: &str) -> Result<usize, Failure> {
    let failure = |reason: String| Failure::InstanceConstruction {
        type_name: type_name.to_owned(),
        reason,
    };

    if class.is_interface() {
        return Err(failure("it is an interface".to_owned()));
    }
    if class.is_abstract() {
        return Err(failure("it is abstract".to_owned()));
    }

    let constructor = class
        .method("<init>", "()V")
        .filter(|constructor| constructor.access_flags.contains(MethodAccessFlags::PUBLIC))
        .ok_or_else(|| failure("no public no-argument constructor".to_owned()))?;

    if let Err(trap) = vm.initialize(class) {
        return Err(failure(vm.describe_trap(trap)));
    }

    let instance = vm.new_object(class);
    if let Err(trap) = vm.invoke(class, constructor, &[JvmValue::Reference(instance)]) {
        return Err(failure(vm.describe_trap(trap)));
    }

    Ok(instance)
}

fn invoke<'a>(
    vm: &mut Vm<'a>,
    target: &Target<'a>,
    arguments: &[Argument],
) -> Result<Outcome, Failure> {
    let invoked = call(vm, target, arguments).and_then(|result| {
        match (result, target.method.return_type) {
            (None, None) => Ok(Outcome::Void),
            (Some(value), Some(return_type)) => {
                format::java_text(vm, value, &return_type).map(Outcome::Value)
            }
            (result, return_type) => Err(Trap::Fault(eyre!(
                "method returned {result:?} for return type {return_type:?}"
            ))),
        }
    });

    invoked.map_err(|trap| Failure::Invocation(vm.describe_trap(trap)))
}

fn call<'a>(
    vm: &mut Vm<'a>,
    target: &Target<'a>,
    arguments: &[Argument],
) -> Result<Option<JvmValue>, Trap> {
    let mut args = Vec::with_capacity(arguments.len() + 1);
    match target.receiver {
        Some(receiver) => args.push(JvmValue::Reference(receiver)),
        None => vm.initialize(target.declaring)?,
    }

    for (argument, param) in arguments.iter().zip(target.method.params) {
        let value = match argument {
            Argument::Null if param.is_reference() => JvmValue::NULL,
            Argument::Null => {
                let message = format!("null is not a valid {param} argument");
                return Err(vm.throw(jdk::ILLEGAL_ARGUMENT, Some(message)));
            }
            Argument::Text(text) => JvmValue::Reference(vm.new_string(text)?),
            primitive => primitive
                .primitive_value()
                .ok_or_else(|| eyre!("cannot pass {primitive:?}"))?,
        };
        args.push(value);
    }

    vm.invoke(target.declaring, target.method, &args)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_render_two_lines() {
        let report = Report {
            type_name: "demo.Calculator".to_owned(),
            method_name: "add".to_owned(),
            outcome: Outcome::Value("7".to_owned()),
        };
        insta::assert_snapshot!(report, @r###"
        demo.Calculator add executed successfully.
        Return value: 7
        "###);

        let report = Report {
            outcome: Outcome::Void,
            ..report
        };
        insta::assert_snapshot!(report, @r###"
        demo.Calculator add executed successfully.
        Method executed successfully.
        "###);
    }

    #[test]
    fn stages_read_as_steps() {
        assert_eq!(Stage::DescriptorRead.to_string(), "reading the descriptor");
        assert_eq!(Stage::Invoked.to_string(), "invoking the method");
    }
}
