//! The classes packed into the test archive.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use zip::write::FileOptions;
use zip::ZipWriter;

use crate::assembler::{
    op, ClassBuilder, ACC_ABSTRACT, ACC_INTERFACE, ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC, ACC_SUPER,
};

const OBJECT: &str = "java/lang/Object";
const STRING_BUILDER: &str = "java/lang/StringBuilder";
const ILLEGAL_STATE: &str = "java/lang/IllegalStateException";
const PUBLIC_STATIC: u16 = ACC_PUBLIC | ACC_STATIC;

pub fn write_jar(path: &Path) -> std::io::Result<()> {
    let mut zip = ZipWriter::new(File::create(path)?);

    zip.add_directory("demo/", FileOptions::default())?;
    for (name, bytes) in classes() {
        zip.start_file(format!("{name}.class"), FileOptions::default())?;
        zip.write_all(&bytes)?;
    }
    zip.start_file("META-INF/MANIFEST.MF", FileOptions::default())?;
    zip.write_all(b"Manifest-Version: 1.0\r\n")?;

    zip.finish()?;
    Ok(())
}

fn classes() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("demo/Calculator", calculator()),
        ("demo/Counter", counter()),
        ("demo/Failing", failing()),
        ("demo/Base", base()),
        ("demo/Derived", derived()),
        ("demo/NoDefault", no_default()),
        ("demo/Shape", shape()),
        ("demo/Greeter", greeter()),
        ("demo/Polite", polite()),
        ("demo/Parent", parent()),
        ("demo/Child", child()),
        ("demo/Fragile", fragile()),
        ("demo/Hidden", hidden()),
        ("demo/Recursion", recursion()),
    ]
}

fn calculator() -> Vec<u8> {
    const CALCULATOR: &str = "demo/Calculator";

    let mut class = ClassBuilder::new(CALCULATOR);
    class
        .field(ACC_PRIVATE, "total", "I")
        .method(ACC_PUBLIC, "<init>", "()V", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESPECIAL, OBJECT, "<init>", "()V")
                .op_u8(op::ALOAD, 0)
                .int(10)
                .field(op::PUTFIELD, CALCULATOR, "total", "I")
                .op(op::RETURN);
        })
        .method(PUBLIC_STATIC, "add", "(II)I", |code| {
            code.op_u8(op::ILOAD, 0)
                .op_u8(op::ILOAD, 1)
                .op(op::IADD)
                .op(op::IRETURN);
        })
        .method(ACC_PUBLIC, "multiply", "(II)I", |code| {
            code.op_u8(op::ILOAD, 1)
                .op_u8(op::ILOAD, 2)
                .op(op::IMUL)
                .op(op::IRETURN);
        })
        .method(ACC_PUBLIC, "addToTotal", "(I)I", |code| {
            code.op_u8(op::ALOAD, 0)
                .field(op::GETFIELD, CALCULATOR, "total", "I")
                .op_u8(op::ILOAD, 1)
                .op(op::IADD)
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "square", "(J)J", |code| {
            code.op_u8(op::LLOAD, 0)
                .op_u8(op::LLOAD, 0)
                .op(op::LMUL)
                .op(op::LRETURN);
        })
        .method(PUBLIC_STATIC, "half", "(D)D", |code| {
            code.op_u8(op::DLOAD, 0)
                .double(2.0)
                .op(op::DDIV)
                .op(op::DRETURN);
        })
        .method(PUBLIC_STATIC, "scale", "(FF)F", |code| {
            code.op_u8(op::FLOAD, 0)
                .op_u8(op::FLOAD, 1)
                .op(op::FMUL)
                .op(op::FRETURN);
        })
        .method(PUBLIC_STATIC, "big", "(D)D", |code| {
            code.op_u8(op::DLOAD, 0)
                .double(1e10)
                .op(op::DMUL)
                .op(op::DRETURN);
        })
        .method(PUBLIC_STATIC, "divide", "(II)I", |code| {
            code.op_u8(op::ILOAD, 0)
                .op_u8(op::ILOAD, 1)
                .op(op::IDIV)
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "safeDivide", "(II)I", |code| {
            code.label("start")
                .op_u8(op::ILOAD, 0)
                .op_u8(op::ILOAD, 1)
                .op(op::IDIV)
                .label("end")
                .op(op::IRETURN)
                .label("handler")
                .op(op::POP)
                .int(-1)
                .op(op::IRETURN)
                .handler("start", "end", "handler", Some("java/lang/ArithmeticException"));
        })
        .method(PUBLIC_STATIC, "sumTo", "(I)I", |code| {
            code.int(0)
                .op_u8(op::ISTORE, 1)
                .int(1)
                .op_u8(op::ISTORE, 2)
                .label("loop")
                .op_u8(op::ILOAD, 2)
                .op_u8(op::ILOAD, 0)
                .jump(op::IF_ICMPGT, "done")
                .op_u8(op::ILOAD, 1)
                .op_u8(op::ILOAD, 2)
                .op(op::IADD)
                .op_u8(op::ISTORE, 1)
                .iinc(2, 1)
                .jump(op::GOTO, "loop")
                .label("done")
                .op_u8(op::ILOAD, 1)
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "squares", "(I)I", |code| {
            // int[] a = new int[n]; a[i] = i * i; return a[n - 1] + a.length
            code.op_u8(op::ILOAD, 0)
                .op_u8(op::NEWARRAY, 10)
                .op_u8(op::ASTORE, 1)
                .int(0)
                .op_u8(op::ISTORE, 2)
                .label("loop")
                .op_u8(op::ILOAD, 2)
                .op_u8(op::ILOAD, 0)
                .jump(op::IF_ICMPGE, "done")
                .op_u8(op::ALOAD, 1)
                .op_u8(op::ILOAD, 2)
                .op_u8(op::ILOAD, 2)
                .op_u8(op::ILOAD, 2)
                .op(op::IMUL)
                .op(op::IASTORE)
                .iinc(2, 1)
                .jump(op::GOTO, "loop")
                .label("done")
                .op_u8(op::ALOAD, 1)
                .op_u8(op::ILOAD, 0)
                .int(1)
                .op(op::ISUB)
                .op(op::IALOAD)
                .op_u8(op::ALOAD, 1)
                .op(op::ARRAYLENGTH)
                .op(op::IADD)
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "greet", "(Ljava/lang/String;)Ljava/lang/String;", |code| {
            let append = "(Ljava/lang/String;)Ljava/lang/StringBuilder;";
            code.new_object(STRING_BUILDER)
                .op(op::DUP)
                .invoke(op::INVOKESPECIAL, STRING_BUILDER, "<init>", "()V")
                .string("Hello, ")
                .invoke(op::INVOKEVIRTUAL, STRING_BUILDER, "append", append)
                .op_u8(op::ALOAD, 0)
                .invoke(op::INVOKEVIRTUAL, STRING_BUILDER, "append", append)
                .string("!")
                .invoke(op::INVOKEVIRTUAL, STRING_BUILDER, "append", append)
                .invoke(op::INVOKEVIRTUAL, STRING_BUILDER, "toString", "()Ljava/lang/String;")
                .op(op::ARETURN);
        })
        .method(PUBLIC_STATIC, "initial", "(Ljava/lang/String;)C", |code| {
            code.op_u8(op::ALOAD, 0)
                .int(0)
                .invoke(op::INVOKEVIRTUAL, "java/lang/String", "charAt", "(I)C")
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "charCode", "(C)I", |code| {
            code.op_u8(op::ILOAD, 0).op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "echo", "(Ljava/lang/String;)Ljava/lang/String;", |code| {
            code.op_u8(op::ALOAD, 0).op(op::ARETURN);
        })
        .method(
            PUBLIC_STATIC,
            "describe",
            "(Ljava/lang/String;I)Ljava/lang/String;",
            |code| {
                code.op_u8(op::ALOAD, 0)
                    .op_u8(op::ILOAD, 1)
                    .concat("\u{1} has \u{1} items", "(Ljava/lang/String;I)Ljava/lang/String;")
                    .op(op::ARETURN);
            },
        )
        .method(PUBLIC_STATIC, "parse", "(Ljava/lang/String;)I", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESTATIC, "java/lang/Integer", "parseInt", "(Ljava/lang/String;)I")
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "shout", "(Ljava/lang/String;)V", |code| {
            code.field(op::GETSTATIC, "java/lang/System", "out", "Ljava/io/PrintStream;")
                .op_u8(op::ALOAD, 0)
                .invoke(op::INVOKEVIRTUAL, "java/io/PrintStream", "println", "(Ljava/lang/String;)V")
                .op(op::RETURN);
        })
        .method(PUBLIC_STATIC, "ping", "()V", |code| {
            code.op(op::RETURN);
        })
        .method(PUBLIC_STATIC, "isEven", "(I)Z", |code| {
            code.op_u8(op::ILOAD, 0)
                .int(2)
                .op(op::IREM)
                .jump(op::IFNE, "odd")
                .int(1)
                .op(op::IRETURN)
                .label("odd")
                .int(0)
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "negate", "(Z)Z", |code| {
            code.op_u8(op::ILOAD, 0)
                .int(1)
                .op(op::IXOR)
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "isNull", "(Ljava/lang/Object;)Z", |code| {
            code.op_u8(op::ALOAD, 0)
                .jump(op::IFNONNULL, "present")
                .int(1)
                .op(op::IRETURN)
                .label("present")
                .int(0)
                .op(op::IRETURN);
        })
        .method(ACC_PUBLIC, "self", "()Ldemo/Calculator;", |code| {
            code.op_u8(op::ALOAD, 0).op(op::ARETURN);
        })
        .method(ACC_PUBLIC, "toString", "()Ljava/lang/String;", |code| {
            code.op_u8(op::ALOAD, 0)
                .field(op::GETFIELD, CALCULATOR, "total", "I")
                .concat("Calculator(total=\u{1})", "(I)Ljava/lang/String;")
                .op(op::ARETURN);
        })
        .method(ACC_PRIVATE | ACC_STATIC, "secret", "()I", |code| {
            code.int(42).op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "nothing", "()Ljava/lang/Object;", |code| {
            code.op(op::ACONST_NULL).op(op::ARETURN);
        });

    class.build()
}

fn counter() -> Vec<u8> {
    const COUNTER: &str = "demo/Counter";

    let mut class = ClassBuilder::new(COUNTER);
    class
        .field(ACC_PRIVATE | ACC_STATIC, "count", "I")
        .method(ACC_STATIC, "<clinit>", "()V", |code| {
            code.int(41)
                .field(op::PUTSTATIC, COUNTER, "count", "I")
                .op(op::RETURN);
        })
        .method(PUBLIC_STATIC, "next", "()I", |code| {
            code.field(op::GETSTATIC, COUNTER, "count", "I")
                .int(1)
                .op(op::IADD)
                .op(op::DUP)
                .field(op::PUTSTATIC, COUNTER, "count", "I")
                .op(op::IRETURN);
        });

    class.build()
}

fn failing() -> Vec<u8> {
    let mut class = ClassBuilder::new("demo/Failing");
    class
        .default_constructor(OBJECT)
        .method(ACC_PUBLIC, "fail", "()V", |code| {
            code.new_object(ILLEGAL_STATE)
                .op(op::DUP)
                .string("boom")
                .invoke(op::INVOKESPECIAL, ILLEGAL_STATE, "<init>", "(Ljava/lang/String;)V")
                .op(op::ATHROW);
        });

    class.build()
}

fn base() -> Vec<u8> {
    let mut class = ClassBuilder::new("demo/Base");
    class
        .default_constructor(OBJECT)
        .method(ACC_PUBLIC, "hello", "()Ljava/lang/String;", |code| {
            code.string("hello from base").op(op::ARETURN);
        });

    class.build()
}

fn derived() -> Vec<u8> {
    let mut class = ClassBuilder::extending("demo/Derived", "demo/Base");
    class.default_constructor("demo/Base");
    class.build()
}

fn no_default() -> Vec<u8> {
    let mut class = ClassBuilder::new("demo/NoDefault");
    class
        .method(ACC_PUBLIC, "<init>", "(I)V", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESPECIAL, OBJECT, "<init>", "()V")
                .op(op::RETURN);
        })
        .method(ACC_PUBLIC, "value", "()I", |code| {
            code.int(1).op(op::IRETURN);
        });

    class.build()
}

fn shape() -> Vec<u8> {
    let mut class =
        ClassBuilder::new("demo/Shape").flags(ACC_PUBLIC | ACC_SUPER | ACC_ABSTRACT);
    class
        .default_constructor(OBJECT)
        .abstract_method(ACC_PUBLIC, "area", "()I");

    class.build()
}

fn greeter() -> Vec<u8> {
    let mut class =
        ClassBuilder::new("demo/Greeter").flags(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT);
    class
        .method(ACC_PUBLIC, "greet", "()Ljava/lang/String;", |code| {
            code.string("hi from default").op(op::ARETURN);
        })
        .method(PUBLIC_STATIC, "make", "()Ldemo/Greeter;", |code| {
            code.op(op::ACONST_NULL).op(op::ARETURN);
        });

    class.build()
}

fn polite() -> Vec<u8> {
    let mut class = ClassBuilder::new("demo/Polite").implements("demo/Greeter");
    class.default_constructor(OBJECT);
    class.build()
}

/// `Parent.v` and `Child.v` are separate fields; `both()` reads each.
fn parent() -> Vec<u8> {
    const PARENT: &str = "demo/Parent";

    let mut class = ClassBuilder::new(PARENT);
    class
        .field(ACC_PUBLIC, "v", "I")
        .method(ACC_PUBLIC, "<init>", "()V", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESPECIAL, OBJECT, "<init>", "()V")
                .op_u8(op::ALOAD, 0)
                .int(1)
                .field(op::PUTFIELD, PARENT, "v", "I")
                .op(op::RETURN);
        });

    class.build()
}

fn child() -> Vec<u8> {
    const CHILD: &str = "demo/Child";

    let mut class = ClassBuilder::extending(CHILD, "demo/Parent");
    class
        .field(ACC_PUBLIC, "v", "I")
        .method(ACC_PUBLIC, "<init>", "()V", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESPECIAL, "demo/Parent", "<init>", "()V")
                .op_u8(op::ALOAD, 0)
                .int(2)
                .field(op::PUTFIELD, CHILD, "v", "I")
                .op(op::RETURN);
        })
        .method(ACC_PUBLIC, "both", "()I", |code| {
            code.op_u8(op::ALOAD, 0)
                .field(op::GETFIELD, CHILD, "v", "I")
                .int(10)
                .op(op::IMUL)
                .op_u8(op::ALOAD, 0)
                .field(op::GETFIELD, "demo/Parent", "v", "I")
                .op(op::IADD)
                .op(op::IRETURN);
        });

    class.build()
}

fn fragile() -> Vec<u8> {
    let mut class = ClassBuilder::new("demo/Fragile");
    class
        .method(ACC_PUBLIC, "<init>", "()V", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESPECIAL, OBJECT, "<init>", "()V")
                .new_object(ILLEGAL_STATE)
                .op(op::DUP)
                .string("ctor boom")
                .invoke(op::INVOKESPECIAL, ILLEGAL_STATE, "<init>", "(Ljava/lang/String;)V")
                .op(op::ATHROW);
        })
        .method(ACC_PUBLIC, "value", "()I", |code| {
            code.int(1).op(op::IRETURN);
        });

    class.build()
}

fn hidden() -> Vec<u8> {
    let mut class = ClassBuilder::new("demo/Hidden");
    class
        .method(ACC_PRIVATE, "<init>", "()V", |code| {
            code.op_u8(op::ALOAD, 0)
                .invoke(op::INVOKESPECIAL, OBJECT, "<init>", "()V")
                .op(op::RETURN);
        })
        .method(ACC_PUBLIC, "value", "()I", |code| {
            code.int(1).op(op::IRETURN);
        });

    class.build()
}

fn recursion() -> Vec<u8> {
    const RECURSION: &str = "demo/Recursion";

    let mut class = ClassBuilder::new(RECURSION);
    class
        .method(PUBLIC_STATIC, "depth", "(I)I", |code| {
            // n == 0 ? 0 : depth(n - 1) + 1
            code.op_u8(op::ILOAD, 0)
                .jump(op::IFNE, "recurse")
                .int(0)
                .op(op::IRETURN)
                .label("recurse")
                .op_u8(op::ILOAD, 0)
                .int(1)
                .op(op::ISUB)
                .invoke(op::INVOKESTATIC, RECURSION, "depth", "(I)I")
                .int(1)
                .op(op::IADD)
                .op(op::IRETURN);
        })
        .method(PUBLIC_STATIC, "forever", "(I)I", |code| {
            code.op_u8(op::ILOAD, 0)
                .invoke(op::INVOKESTATIC, RECURSION, "forever", "(I)I")
                .op(op::IRETURN);
        });

    class.build()
}
