use std::{
    sync::{Arc, OnceLock},
    time::{Duration, Instant},
};

use rustc_hash::FxHashMap;

use crate::{
    engine::Engine,
    error::{ExecutionError, ExecutionErrorKind, WithSpan},
    span::Span,
    sync,
    value::{
        function::{FnArg, Function},
        types::Type,
        Value,
    },
};

use super::{prototypes::values, Interpreter};

const SLEEP_SLICE: Duration = Duration::from_millis(10);

/// Global functions reached once scope lookup fails.
pub(crate) fn builtin(engine: &Arc<Engine>, name: &str) -> Option<Value> {
    if name == "Context" {
        return Some(Value::StructDef(engine.context_definition()));
    }
    static TABLE: OnceLock<FxHashMap<String, Value>> = OnceLock::new();
    TABLE.get_or_init(table).get(name).cloned()
}

fn table() -> FxHashMap<String, Value> {
    let any = || vec![FnArg::new("value", Type::ANY)];
    let functions = [
        Function::variadic("println", Type::VOID, |interp, args, span| {
            interp.write_output(&format!("{}\n", join(&args))).at(span)?;
            Ok(None)
        }),
        Function::variadic("print", Type::VOID, |interp, args, span| {
            interp.write_output(&join(&args)).at(span)?;
            Ok(None)
        }),
        Function::native("type", any(), Type::STRING, |_, args, span| {
            let [value] = values(args).at(span)?;
            Ok(Some(Value::string(value.type_of().to_string())))
        }),
        Function::native("inspect", any(), Type::STRING, |_, args, span| {
            let [value] = values(args).at(span)?;
            Ok(Some(Value::string(value.inspect())))
        }),
        Function::native("string", any(), Type::STRING, |_, args, span| {
            let [value] = values(args).at(span)?;
            Ok(Some(to_string(value)))
        }),
        Function::native("int", any(), Type::INT, |_, args, span| {
            let [value] = values(args).at(span)?;
            to_int(value).map(|n| Some(Value::Int(n))).at(span)
        }),
        Function::native("float", any(), Type::FLOAT, |_, args, span| {
            let [value] = values(args).at(span)?;
            to_float(value).map(|n| Some(Value::Float(n))).at(span)
        }),
        Function::native("bool", any(), Type::BOOL, |_, args, span| {
            let [value] = values(args).at(span)?;
            to_bool(value).map(|b| Some(Value::Bool(b))).at(span)
        }),
        Function::native("byte", any(), Type::BYTE, |_, args, span| {
            let [value] = values(args).at(span)?;
            to_byte(value).map(|b| Some(Value::Byte(b))).at(span)
        }),
        Function::native("char", any(), Type::CHAR, |_, args, span| {
            let [value] = values(args).at(span)?;
            to_char(value).map(|c| Some(Value::Char(c))).at(span)
        }),
        Function::native(
            "range",
            vec![
                FnArg::new("start", Type::INT),
                FnArg::new("stop", Type::Nullable(Box::new(Type::INT))).with_default(Value::Nil),
                FnArg::new("step", Type::INT).with_default(Value::Int(1)),
            ],
            Type::list(Type::INT),
            |_, args, span| {
                let [start, stop, step] = values(args).at(span)?;
                range(start, stop, step).map(Some).at(span)
            },
        ),
        Function::native(
            "sleep",
            vec![FnArg::new("ms", Type::INT).with_default(Value::Int(0))],
            Type::VOID,
            |interp, args, span| {
                let [ms] = values(args).at(span)?;
                sleep(interp, ms, span).map(|_| None)
            },
        ),
        Function::native("isNil", any(), Type::BOOL, |_, args, span| {
            let [value] = values(args).at(span)?;
            Ok(Some(Value::Bool(value.is_nil())))
        }),
        Function::native(
            "panic",
            vec![FnArg::new("message", Type::STRING)],
            Type::VOID,
            |_, args, span| {
                let [message] = values(args).at(span)?;
                Err(ExecutionError::new(
                    ExecutionErrorKind::Panic(message.to_string()),
                    span.clone(),
                ))
            },
        ),
        Function::native("clone", any(), Type::ANY, |_, args, span| {
            let [value] = values(args).at(span)?;
            Ok(Some(value.deep_clone()))
        }),
        Function::native("ref", any(), Type::ANY, |_, args, span| {
            let [value] = values(args).at(span)?;
            Ok(Some(Value::reference(value)))
        }),
        Function::native("unwrap", any(), Type::ANY, |_, args, span| match values(args).at(span)? {
            [Value::Ref(inner)] => Ok(Some(sync::read(&inner).clone())),
            [other] => Err(ExecutionError::new(
                ExecutionErrorKind::TypeMismatch(format!(
                    "cannot unwrap non-reference value of type {}",
                    other.type_of()
                )),
                span.clone(),
            )),
        }),
    ];

    functions
        .into_iter()
        .map(|function| (function.name.clone().unwrap_or_default(), Value::function(function)))
        .collect()
}

fn join(args: &[Value]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

fn cannot_convert(value: &Value, target: &str) -> ExecutionErrorKind {
    ExecutionErrorKind::TypeMismatch(format!("cannot convert {} to {target}", value.type_of()))
}

/// A byte list decodes as UTF-8; everything else uses its display form.
fn to_string(value: Value) -> Value {
    if let Value::List(list) = &value {
        if list.item_type == Type::BYTE {
            let bytes: Vec<u8> = list
                .read()
                .iter()
                .filter_map(|item| match item {
                    Value::Byte(b) => Some(*b),
                    _ => None,
                })
                .collect();
            return Value::string(String::from_utf8_lossy(&bytes));
        }
    }
    Value::string(value.to_string())
}

fn to_int(value: Value) -> Result<i64, ExecutionErrorKind> {
    Ok(match &value {
        Value::Int(n) => *n,
        Value::Float(f) => *f as i64,
        Value::Bool(b) => i64::from(*b),
        Value::Char(c) => i64::from(u32::from(*c)),
        Value::Byte(b) => i64::from(*b),
        Value::String(s) => match s.trim().parse::<i64>() {
            Ok(n) => n,
            Err(_) => s
                .trim()
                .parse::<f64>()
                .map(|f| f as i64)
                .map_err(|_| cannot_convert(&value, "int"))?,
        },
        _ => return Err(cannot_convert(&value, "int")),
    })
}

fn to_float(value: Value) -> Result<f64, ExecutionErrorKind> {
    Ok(match &value {
        Value::Float(f) => *f,
        Value::Int(n) => *n as f64,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Char(c) => f64::from(u32::from(*c)),
        Value::Byte(b) => f64::from(*b),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| cannot_convert(&value, "float"))?,
        _ => return Err(cannot_convert(&value, "float")),
    })
}

fn to_bool(value: Value) -> Result<bool, ExecutionErrorKind> {
    Ok(match &value {
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::Char(c) => *c != '\0',
        Value::Byte(b) => *b != 0,
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" | "" => false,
            _ => return Err(cannot_convert(&value, "bool")),
        },
        _ => return Err(cannot_convert(&value, "bool")),
    })
}

fn to_byte(value: Value) -> Result<u8, ExecutionErrorKind> {
    let byte = match &value {
        Value::Byte(b) => Some(*b),
        Value::Char(c) => u8::try_from(u32::from(*c)).ok(),
        Value::Int(n) => u8::try_from(*n).ok(),
        Value::Float(f) if (0.0..256.0).contains(f) => Some(*f as u8),
        Value::Bool(b) => Some(u8::from(*b)),
        Value::String(s) if s.len() == 1 => s.bytes().next(),
        _ => None,
    };
    byte.ok_or_else(|| cannot_convert(&value, "byte"))
}

fn to_char(value: Value) -> Result<char, ExecutionErrorKind> {
    let c = match &value {
        Value::Char(c) => Some(*c),
        Value::Byte(b) => Some(char::from(*b)),
        Value::Int(n) => u32::try_from(*n).ok().and_then(char::from_u32),
        Value::Float(f) if *f >= 0.0 => char::from_u32(*f as u32),
        Value::Bool(b) => Some(if *b { '1' } else { '0' }),
        Value::String(s) => {
            let mut chars = s.chars();
            chars.next().filter(|_| chars.next().is_none())
        }
        _ => None,
    };
    c.ok_or_else(|| cannot_convert(&value, "char"))
}

/// `range(stop)`, `range(start, stop)` or `range(start, stop, step)`.
fn range(start: Value, stop: Value, step: Value) -> Result<Value, ExecutionErrorKind> {
    let (Value::Int(mut start), Value::Int(step)) = (start, step) else {
        return Err(ExecutionErrorKind::TypeMismatch("range expects int bounds".into()));
    };
    if step == 0 {
        return Err(ExecutionErrorKind::Value("range step cannot be 0".into()));
    }
    let stop = match stop {
        Value::Int(stop) => stop,
        _ => std::mem::replace(&mut start, 0),
    };

    let mut items = Vec::new();
    let mut current = start;
    while (step > 0 && current < stop) || (step < 0 && current > stop) {
        items.push(Value::Int(current));
        let Some(next) = current.checked_add(step) else {
            break;
        };
        current = next;
    }
    Ok(Value::list(items, Type::INT))
}

/// Sleeps in short slices so cancellation interrupts it.
fn sleep(interp: &Interpreter, ms: Value, span: &Span) -> Result<(), ExecutionError> {
    let ms = match ms {
        Value::Int(ms) => u64::try_from(ms)
            .map_err(|_| ExecutionErrorKind::Value("duration must be non-negative".into()))
            .at(span)?,
        _ => 0,
    };
    let deadline = Instant::now() + Duration::from_millis(ms);
    loop {
        interp.check_cancelled(span)?;
        let now = Instant::now();
        if now >= deadline {
            return Ok(());
        }
        std::thread::sleep((deadline - now).min(SLEEP_SLICE));
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_range_forms() {
        let ints = |value: Value| value.to_string();
        assert_eq!(
            ints(range(Value::Int(3), Value::Nil, Value::Int(1)).unwrap()),
            "[0, 1, 2]"
        );
        assert_eq!(
            ints(range(Value::Int(5), Value::Int(0), Value::Int(-2)).unwrap()),
            "[5, 3, 1]"
        );
        assert!(range(Value::Int(0), Value::Int(3), Value::Int(0)).is_err());
    }

    #[test]
    fn test_conversions() {
        assert_eq!(to_int(Value::string(" 42 ")).unwrap(), 42);
        assert_eq!(to_int(Value::string("3.9")).unwrap(), 3);
        assert_eq!(to_float(Value::Int(2)).unwrap(), 2.0);
        assert!(to_bool(Value::string("yes")).is_err());
        assert!(to_bool(Value::string("TRUE")).unwrap());
        assert_eq!(to_byte(Value::Int(255)).unwrap(), 255);
        assert!(to_byte(Value::Int(256)).is_err());
        assert_eq!(to_char(Value::Int(97)).unwrap(), 'a');
        assert!(to_char(Value::string("ab")).is_err());
    }

    #[test]
    fn test_byte_list_decodes_as_text() {
        let bytes = Value::list(vec![Value::Byte(104), Value::Byte(105)], Type::BYTE);
        assert_eq!(to_string(bytes).to_string(), "hi");
    }
}
