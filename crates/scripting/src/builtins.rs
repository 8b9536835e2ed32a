//! Built-in functions and methods
//!
//! The callable surface is a fixed allow-list modelled as enums: free
//! functions ([`Builtin`]), array methods ([`ArrayMethod`]) and chart
//! methods ([`ChartMethod`], [`RowMethod`]). Anything not on a list is an
//! `UnknownMethod` error.

use crate::context::{EvaluationContext, SideEffects};
use crate::error::{Result, ScriptError};
use crate::subscriptions::SubscriptionManager;
use crate::value::Value;
use rand::Rng;
use std::rc::Rc;
use tracing::debug;

/// Free built-in functions, resolved before host globals and user scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    Subscribe,
    Announce,
    Log,
    Floor,
    Ceil,
    Round,
    Abs,
    Min,
    Max,
    Sqrt,
    Pow,
    Number,
    String,
    Chart,
}

impl Builtin {
    pub const ALL: [Builtin; 14] = [
        Builtin::Subscribe,
        Builtin::Announce,
        Builtin::Log,
        Builtin::Floor,
        Builtin::Ceil,
        Builtin::Round,
        Builtin::Abs,
        Builtin::Min,
        Builtin::Max,
        Builtin::Sqrt,
        Builtin::Pow,
        Builtin::Number,
        Builtin::String,
        Builtin::Chart,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|b| b.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Builtin::Subscribe => "subscribe",
            Builtin::Announce => "announce",
            Builtin::Log => "log",
            Builtin::Floor => "floor",
            Builtin::Ceil => "ceil",
            Builtin::Round => "round",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sqrt => "sqrt",
            Builtin::Pow => "pow",
            Builtin::Number => "number",
            Builtin::String => "string",
            Builtin::Chart => "Chart",
        }
    }

    /// Call the builtin
    pub fn call(
        self,
        args: &[Value],
        ctx: &mut EvaluationContext,
        subscriptions: &SubscriptionManager,
        console_log: bool,
    ) -> Result<Value> {
        match self {
            Builtin::Subscribe => {
                let names: Vec<String> = args.iter().flat_map(subscription_names).collect();
                match ctx.script_id() {
                    Some(script_id) => subscriptions.register_for(script_id, &names),
                    None => subscriptions.register_subscription(&names)?,
                }
                Ok(Value::Null)
            }
            Builtin::Announce => {
                arity_between(self.name(), args, 1, 2)?;
                let announcement_id = match args.get(1) {
                    None | Some(Value::Null) => None,
                    Some(id) => Some(id.to_string()),
                };
                ctx.effects_mut().announce(args[0].to_string(), announcement_id);
                Ok(Value::Null)
            }
            Builtin::Log => {
                ctx.effects_mut().log(args);
                if console_log {
                    if let Some(line) = ctx.effects().log_messages.last() {
                        debug!(target: "qbscript::console", script = ctx.script_id().unwrap_or("-"), "{}", line);
                    }
                }
                Ok(Value::Null)
            }
            Builtin::Floor => unary_math(self.name(), args, f64::floor),
            Builtin::Ceil => unary_math(self.name(), args, f64::ceil),
            // Halves round towards positive infinity
            Builtin::Round => unary_math(self.name(), args, |n| (n + 0.5).floor()),
            Builtin::Abs => unary_math(self.name(), args, f64::abs),
            Builtin::Sqrt => unary_math(self.name(), args, f64::sqrt),
            Builtin::Min => fold_numbers(self.name(), args, f64::min),
            Builtin::Max => fold_numbers(self.name(), args, f64::max),
            Builtin::Pow => {
                arity(self.name(), args, 2)?;
                let base = number_arg(self.name(), &args[0])?;
                let exponent = number_arg(self.name(), &args[1])?;
                Ok(Value::Number(base.powf(exponent)))
            }
            Builtin::Number => {
                arity(self.name(), args, 1)?;
                Ok(Value::Number(args[0].coerce_number().unwrap_or(f64::NAN)))
            }
            Builtin::String => {
                arity(self.name(), args, 1)?;
                Ok(Value::String(args[0].to_string()))
            }
            Builtin::Chart => {
                arity(self.name(), args, 1)?;
                let name = match &args[0] {
                    Value::String(s) => s.clone(),
                    other => {
                        return Err(ScriptError::TypeError(format!(
                            "Chart() expects a chart name, got {}",
                            other.type_name()
                        )))
                    }
                };
                Ok(Value::Chart(ctx.chart(&name)?))
            }
        }
    }
}

fn subscription_names(arg: &Value) -> Vec<String> {
    match arg {
        Value::Array(items) => items.iter().map(|v| v.to_string()).collect(),
        other => vec![other.to_string()],
    }
}

/// Methods callable on arrays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayMethod {
    Count,
    First,
    Last,
    Random,
    Filter,
    FilterEmpty,
}

impl ArrayMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        let method = match name {
            "count" => ArrayMethod::Count,
            "first" => ArrayMethod::First,
            "last" => ArrayMethod::Last,
            "random" => ArrayMethod::Random,
            "filter" => ArrayMethod::Filter,
            "filterEmpty" => ArrayMethod::FilterEmpty,
            _ => return None,
        };
        Some(method)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ArrayMethod::Count => "count",
            ArrayMethod::First => "first",
            ArrayMethod::Last => "last",
            ArrayMethod::Random => "random",
            ArrayMethod::Filter => "filter",
            ArrayMethod::FilterEmpty => "filterEmpty",
        }
    }

    pub fn call(self, items: &[Value], args: &[Value]) -> Result<Value> {
        arity(self.name(), args, 0)?;

        let value = match self {
            ArrayMethod::Count => Value::Number(items.len() as f64),
            ArrayMethod::First => items.first().cloned().unwrap_or(Value::Null),
            ArrayMethod::Last => items.last().cloned().unwrap_or(Value::Null),
            ArrayMethod::Random => {
                if items.is_empty() {
                    Value::Null
                } else {
                    let index = rand::thread_rng().gen_range(0..items.len());
                    items[index].clone()
                }
            }
            ArrayMethod::Filter => {
                Value::Array(items.iter().filter(|v| v.is_truthy()).cloned().collect())
            }
            ArrayMethod::FilterEmpty => {
                Value::Array(items.iter().filter(|v| !is_empty_value(v)).cloned().collect())
            }
        };
        Ok(value)
    }
}

/// `null`, `""` and the string `"null"`
fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s == "null",
        _ => false,
    }
}

/// Methods callable on a chart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartMethod {
    Get,
    RowWhere,
}

impl ChartMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "get" => Some(ChartMethod::Get),
            "rowWhere" => Some(ChartMethod::RowWhere),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ChartMethod::Get => "get",
            ChartMethod::RowWhere => "rowWhere",
        }
    }
}

/// Methods callable on a `rowWhere` result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowMethod {
    ValueInColumn,
    Count,
}

impl RowMethod {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "valueInColumn" => Some(RowMethod::ValueInColumn),
            "count" => Some(RowMethod::Count),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RowMethod::ValueInColumn => "valueInColumn",
            RowMethod::Count => "count",
        }
    }
}

fn unknown_method(receiver: &Value, method: &str) -> ScriptError {
    ScriptError::UnknownMethod {
        receiver: receiver.type_name().to_string(),
        method: method.to_string(),
    }
}

/// `receiver.method(args...)`
pub fn call_method(receiver: &Value, method: &str, args: &[Value], effects: &mut SideEffects) -> Result<Value> {
    match receiver {
        Value::Array(items) => match ArrayMethod::from_name(method) {
            Some(m) => m.call(items, args),
            None => Err(unknown_method(receiver, method)),
        },
        Value::Chart(chart) => match ChartMethod::from_name(method) {
            Some(m @ ChartMethod::Get) => {
                arity(m.name(), args, 1)?;
                let column = args[0].to_string();
                Ok(Value::Array(chart.get(&column)?))
            }
            Some(m @ ChartMethod::RowWhere) => {
                arity(m.name(), args, 2)?;
                let column = args[0].to_string();
                Ok(Value::Row(Rc::new(chart.row_where(&column, &args[1]))))
            }
            None => Err(unknown_method(receiver, method)),
        },
        Value::Row(row) => match RowMethod::from_name(method) {
            Some(m @ RowMethod::ValueInColumn) => {
                arity(m.name(), args, 1)?;
                Ok(row.value_in_column(&args[0].to_string()))
            }
            Some(m @ RowMethod::Count) => {
                arity(m.name(), args, 0)?;
                Ok(Value::Number(row.count() as f64))
            }
            None => Err(unknown_method(receiver, method)),
        },
        Value::Object(object) => object.call_method(method, args, effects),
        _ => Err(unknown_method(receiver, method)),
    }
}

/// `receiver.name` without a call
pub fn get_property(receiver: &Value, name: &str) -> Result<Value> {
    match receiver {
        Value::Map(entries) => Ok(entries.get(name).cloned().unwrap_or(Value::Null)),
        Value::Object(object) => object.get_property(name),
        Value::Chart(chart) if name == "name" => Ok(Value::String(chart.name().to_string())),
        _ => Err(unknown_method(receiver, name)),
    }
}

/// Fail unless exactly `expected` arguments were passed
pub fn arity(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(ScriptError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        })
    }
}

fn arity_between(name: &str, args: &[Value], min: usize, max: usize) -> Result<()> {
    if args.len() < min {
        arity(name, args, min)
    } else if args.len() > max {
        arity(name, args, max)
    } else {
        Ok(())
    }
}

/// Require a number argument
pub fn number_arg(name: &str, value: &Value) -> Result<f64> {
    value.as_number().ok_or_else(|| {
        ScriptError::TypeError(format!("{}() expects a number, got {}", name, value.type_name()))
    })
}

fn unary_math(name: &str, args: &[Value], op: impl Fn(f64) -> f64) -> Result<Value> {
    arity(name, args, 1)?;
    Ok(Value::Number(op(number_arg(name, &args[0])?)))
}

/// `min`/`max` over the arguments, or over a single array argument
fn fold_numbers(name: &str, args: &[Value], op: fn(f64, f64) -> f64) -> Result<Value> {
    let values = match args {
        [Value::Array(items)] => items.as_slice(),
        _ => args,
    };
    if args.is_empty() {
        return Err(ScriptError::Arity {
            name: name.to_string(),
            expected: 1,
            got: 0,
        });
    }
    if values.is_empty() {
        return Ok(Value::Null);
    }

    let mut result = number_arg(name, &values[0])?;
    for value in &values[1..] {
        result = op(result, number_arg(name, value)?);
    }
    Ok(Value::Number(result))
}
