//! Module function / constant table
//!
//! `(python_path, params, template, dependency, ret)` の並び。
//! 同じパスに引数の数違いのエントリを複数置ける。

use super::EntryKind;
use crate::manifest::Dependency;
use crate::semantic::{join, Type};

/// One registry entry
#[derive(Debug, Clone, Copy)]
pub struct StdlibSpec {
    pub path: &'static str,
    pub params: &'static [&'static str],
    pub template: &'static str,
    pub dependency: Option<Dependency>,
    pub kind: EntryKind,
    /// Produces a lazy iterator rather than a value
    pub lazy: bool,
    /// 戻り値型を引数型から決める
    pub ret_ty_resolver: fn(args: &[Type]) -> Type,
}

const fn func(
    path: &'static str,
    params: &'static [&'static str],
    template: &'static str,
    dependency: Option<Dependency>,
    ret_ty_resolver: fn(&[Type]) -> Type,
) -> StdlibSpec {
    StdlibSpec {
        path,
        params,
        template,
        dependency,
        kind: EntryKind::Function,
        lazy: false,
        ret_ty_resolver,
    }
}

const fn lazy(
    path: &'static str,
    params: &'static [&'static str],
    template: &'static str,
    dependency: Option<Dependency>,
    ret_ty_resolver: fn(&[Type]) -> Type,
) -> StdlibSpec {
    StdlibSpec {
        path,
        params,
        template,
        dependency,
        kind: EntryKind::Function,
        lazy: true,
        ret_ty_resolver,
    }
}

const fn constant(
    path: &'static str,
    template: &'static str,
    dependency: Option<Dependency>,
    ret_ty_resolver: fn(&[Type]) -> Type,
) -> StdlibSpec {
    StdlibSpec {
        path,
        params: &[],
        template,
        dependency,
        kind: EntryKind::Constant,
        lazy: false,
        ret_ty_resolver,
    }
}

const fn special(
    path: &'static str,
    params: &'static [&'static str],
    dependency: Option<Dependency>,
    ret_ty_resolver: fn(&[Type]) -> Type,
) -> StdlibSpec {
    StdlibSpec {
        path,
        params,
        template: "",
        dependency,
        kind: EntryKind::Special,
        lazy: false,
        ret_ty_resolver,
    }
}

fn arg(args: &[Type], i: usize) -> Type {
    args.get(i).cloned().unwrap_or(Type::Unknown)
}

fn elem(args: &[Type], i: usize) -> Type {
    args.get(i).map(Type::element).unwrap_or(Type::Unknown)
}

const REGEX: Option<Dependency> = Some(Dependency::Regex);
const JSON: Option<Dependency> = Some(Dependency::SerdeJson);
const RAND: Option<Dependency> = Some(Dependency::Rand);
const CHRONO: Option<Dependency> = Some(Dependency::Chrono);
const B64: Option<Dependency> = Some(Dependency::Base64);

pub const MODULE_SPECS: &[StdlibSpec] = &[
    // --- math ---
    func("math.sqrt", &["x"], "{f0}.sqrt()", None, |_| Type::Float),
    func("math.sin", &["x"], "{f0}.sin()", None, |_| Type::Float),
    func("math.cos", &["x"], "{f0}.cos()", None, |_| Type::Float),
    func("math.tan", &["x"], "{f0}.tan()", None, |_| Type::Float),
    func("math.asin", &["x"], "{f0}.asin()", None, |_| Type::Float),
    func("math.acos", &["x"], "{f0}.acos()", None, |_| Type::Float),
    func("math.atan", &["x"], "{f0}.atan()", None, |_| Type::Float),
    func("math.atan2", &["y", "x"], "{f0}.atan2({f1})", None, |_| Type::Float),
    func("math.sinh", &["x"], "{f0}.sinh()", None, |_| Type::Float),
    func("math.cosh", &["x"], "{f0}.cosh()", None, |_| Type::Float),
    func("math.tanh", &["x"], "{f0}.tanh()", None, |_| Type::Float),
    func("math.exp", &["x"], "{f0}.exp()", None, |_| Type::Float),
    func("math.expm1", &["x"], "{f0}.exp_m1()", None, |_| Type::Float),
    func("math.log", &["x"], "{f0}.ln()", None, |_| Type::Float),
    func("math.log", &["x", "base"], "{f0}.log({f1})", None, |_| Type::Float),
    func("math.log10", &["x"], "{f0}.log10()", None, |_| Type::Float),
    func("math.log2", &["x"], "{f0}.log2()", None, |_| Type::Float),
    func("math.log1p", &["x"], "{f0}.ln_1p()", None, |_| Type::Float),
    func("math.pow", &["x", "y"], "{f0}.powf({f1})", None, |_| Type::Float),
    func("math.floor", &["x"], "{f0}.floor() as i64", None, |_| Type::Int),
    func("math.ceil", &["x"], "{f0}.ceil() as i64", None, |_| Type::Int),
    func("math.trunc", &["x"], "{f0}.trunc() as i64", None, |_| Type::Int),
    func("math.fabs", &["x"], "{f0}.abs()", None, |_| Type::Float),
    func("math.hypot", &["x", "y"], "{f0}.hypot({f1})", None, |_| Type::Float),
    func("math.copysign", &["x", "y"], "{f0}.copysign({f1})", None, |_| Type::Float),
    func("math.fmod", &["x", "y"], "{f0} % {f1}", None, |_| Type::Float),
    func("math.degrees", &["x"], "{f0}.to_degrees()", None, |_| Type::Float),
    func("math.radians", &["x"], "{f0}.to_radians()", None, |_| Type::Float),
    func("math.isnan", &["x"], "{f0}.is_nan()", None, |_| Type::Bool),
    func("math.isinf", &["x"], "{f0}.is_infinite()", None, |_| Type::Bool),
    func("math.isfinite", &["x"], "{f0}.is_finite()", None, |_| Type::Bool),
    func(
        "math.isclose",
        &["a", "b"],
        "({f0} - {f1}).abs() <= 1e-9 * {f0}.abs().max({f1}.abs())",
        None,
        |_| Type::Bool,
    ),
    func("math.factorial", &["n"], "(1..={i0}).product::<i64>()", None, |_| Type::Int),
    func(
        "math.gcd",
        &["a", "b"],
        "{ let (mut _a, mut _b) = ({i0}.abs(), {i1}.abs()); while _b != 0 { let _t = _b; _b = _a % _b; _a = _t; } _a }",
        None,
        |_| Type::Int,
    ),
    func("math.isqrt", &["n"], "({i0} as f64).sqrt() as i64", None, |_| Type::Int),
    constant("math.pi", "std::f64::consts::PI", None, |_| Type::Float),
    constant("math.e", "std::f64::consts::E", None, |_| Type::Float),
    constant("math.tau", "std::f64::consts::TAU", None, |_| Type::Float),
    constant("math.inf", "f64::INFINITY", None, |_| Type::Float),
    constant("math.nan", "f64::NAN", None, |_| Type::Float),
    // --- os ---
    func(
        "os.getcwd",
        &[],
        "std::env::current_dir().map(|p| p.to_string_lossy().to_string()).unwrap_or_default()",
        None,
        |_| Type::Str,
    ),
    func(
        "os.listdir",
        &["path=\".\""],
        "std::fs::read_dir({s0}).map(|rd| rd.filter_map(|e| e.ok()).map(|e| e.file_name().to_string_lossy().to_string()).collect::<Vec<String>>()).unwrap_or_default()",
        None,
        |_| Type::list(Type::Str),
    ),
    func(
        "os.mkdir",
        &["path"],
        r#"std::fs::create_dir({s0}).expect("OSError: cannot create directory")"#,
        None,
        |_| Type::None,
    ),
    func(
        "os.makedirs",
        &["path", "exist_ok=false"],
        r#"std::fs::create_dir_all({s0}).expect("OSError: cannot create directory")"#,
        None,
        |_| Type::None,
    ),
    func(
        "os.remove",
        &["path"],
        r#"std::fs::remove_file({s0}).expect("FileNotFoundError: cannot remove file")"#,
        None,
        |_| Type::None,
    ),
    func(
        "os.unlink",
        &["path"],
        r#"std::fs::remove_file({s0}).expect("FileNotFoundError: cannot remove file")"#,
        None,
        |_| Type::None,
    ),
    func(
        "os.rmdir",
        &["path"],
        r#"std::fs::remove_dir({s0}).expect("OSError: cannot remove directory")"#,
        None,
        |_| Type::None,
    ),
    func(
        "os.rename",
        &["src", "dst"],
        r#"std::fs::rename({s0}, {s1}).expect("OSError: cannot rename")"#,
        None,
        |_| Type::None,
    ),
    func("os.getenv", &["key"], "std::env::var({s0}).ok()", None, |_| {
        Type::optional(Type::Str)
    }),
    func(
        "os.getenv",
        &["key", "default"],
        "std::env::var({s0}).unwrap_or_else(|_| {s1}.to_string())",
        None,
        |_| Type::Str,
    ),
    func("os.environ.get", &["key"], "std::env::var({s0}).ok()", None, |_| {
        Type::optional(Type::Str)
    }),
    func(
        "os.environ.get",
        &["key", "default"],
        "std::env::var({s0}).unwrap_or_else(|_| {s1}.to_string())",
        None,
        |_| Type::Str,
    ),
    constant(
        "os.environ",
        "std::env::vars().collect::<HashMap<String, String>>()",
        Some(Dependency::HashMap),
        |_| Type::dict(Type::Str, Type::Str),
    ),
    func("os.getpid", &[], "std::process::id() as i64", None, |_| Type::Int),
    func(
        "os.cpu_count",
        &[],
        "std::thread::available_parallelism().map(|n| n.get() as i64).ok()",
        None,
        |_| Type::optional(Type::Int),
    ),
    constant("os.sep", "std::path::MAIN_SEPARATOR.to_string()", None, |_| Type::Str),
    constant("os.linesep", "\"\\n\".to_string()", None, |_| Type::Str),
    // --- os.path ---
    func(
        "os.path.join",
        &["a", "b"],
        "std::path::Path::new({s0}).join({s1}).to_string_lossy().to_string()",
        None,
        |_| Type::Str,
    ),
    func(
        "os.path.join",
        &["a", "b", "c"],
        "std::path::Path::new({s0}).join({s1}).join({s2}).to_string_lossy().to_string()",
        None,
        |_| Type::Str,
    ),
    func("os.path.exists", &["p"], "std::path::Path::new({s0}).exists()", None, |_| Type::Bool),
    func("os.path.isfile", &["p"], "std::path::Path::new({s0}).is_file()", None, |_| Type::Bool),
    func("os.path.isdir", &["p"], "std::path::Path::new({s0}).is_dir()", None, |_| Type::Bool),
    func("os.path.isabs", &["p"], "std::path::Path::new({s0}).is_absolute()", None, |_| {
        Type::Bool
    }),
    func(
        "os.path.basename",
        &["p"],
        "std::path::Path::new({s0}).file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default()",
        None,
        |_| Type::Str,
    ),
    func(
        "os.path.dirname",
        &["p"],
        "std::path::Path::new({s0}).parent().map(|p| p.to_string_lossy().to_string()).unwrap_or_default()",
        None,
        |_| Type::Str,
    ),
    func(
        "os.path.abspath",
        &["p"],
        "std::fs::canonicalize({s0}).map(|p| p.to_string_lossy().to_string()).unwrap_or_else(|_| {s0}.to_string())",
        None,
        |_| Type::Str,
    ),
    func(
        "os.path.getsize",
        &["p"],
        r#"std::fs::metadata({s0}).map(|m| m.len() as i64).expect("OSError: cannot stat file")"#,
        None,
        |_| Type::Int,
    ),
    func(
        "os.path.splitext",
        &["p"],
        r#"{ let _full = {s0}.to_string(); let _ext = std::path::Path::new(&_full).extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default(); (_full[.._full.len() - _ext.len()].to_string(), _ext) }"#,
        None,
        |_| Type::Tuple(vec![Type::Str, Type::Str]),
    ),
    func(
        "os.path.expanduser",
        &["p"],
        r#"{s0}.replacen('~', &std::env::var("HOME").unwrap_or_default(), 1)"#,
        None,
        |_| Type::Str,
    ),
    // --- sys ---
    constant("sys.argv", "std::env::args().collect::<Vec<String>>()", None, |_| {
        Type::list(Type::Str)
    }),
    constant("sys.maxsize", "i64::MAX", None, |_| Type::Int),
    constant("sys.platform", "std::env::consts::OS.to_string()", None, |_| Type::Str),
    func("sys.exit", &["code=0"], "std::process::exit({i0} as i32)", None, |_| Type::None),
    // --- re ---
    func(
        "re.compile",
        &["pattern"],
        r#"regex::Regex::new({s0}).expect("re.error: invalid pattern")"#,
        REGEX,
        |_| Type::Native("re.Pattern".to_string()),
    ),
    func(
        "re.compile",
        &["pattern", "flags"],
        r#"regex::RegexBuilder::new({s0}).case_insensitive({i1} & 2 != 0).multi_line({i1} & 8 != 0).dot_matches_new_line({i1} & 16 != 0).build().expect("re.error: invalid pattern")"#,
        REGEX,
        |_| Type::Native("re.Pattern".to_string()),
    ),
    func(
        "re.search",
        &["pattern", "string"],
        r#"regex::Regex::new({s0}).expect("re.error: invalid pattern").captures({s1})"#,
        REGEX,
        |_| Type::optional(Type::Native("re.Match".to_string())),
    ),
    func(
        "re.match",
        &["pattern", "string"],
        r#"regex::Regex::new(&format!("^(?:{})", {s0})).expect("re.error: invalid pattern").captures({s1})"#,
        REGEX,
        |_| Type::optional(Type::Native("re.Match".to_string())),
    ),
    func(
        "re.fullmatch",
        &["pattern", "string"],
        r#"regex::Regex::new(&format!("^(?:{})$", {s0})).expect("re.error: invalid pattern").captures({s1})"#,
        REGEX,
        |_| Type::optional(Type::Native("re.Match".to_string())),
    ),
    func(
        "re.findall",
        &["pattern", "string"],
        r#"regex::Regex::new({s0}).expect("re.error: invalid pattern").find_iter({s1}).map(|m| m.as_str().to_string()).collect::<Vec<String>>()"#,
        REGEX,
        |_| Type::list(Type::Str),
    ),
    func(
        "re.finditer",
        &["pattern", "string"],
        r#"regex::Regex::new({s0}).expect("re.error: invalid pattern").find_iter({s1}).map(|m| m.as_str().to_string()).collect::<Vec<String>>()"#,
        REGEX,
        |_| Type::list(Type::Str),
    ),
    func(
        "re.sub",
        &["pattern", "repl", "string"],
        r#"regex::Regex::new({s0}).expect("re.error: invalid pattern").replace_all({s2}, {s1}).to_string()"#,
        REGEX,
        |_| Type::Str,
    ),
    func(
        "re.subn",
        &["pattern", "repl", "string"],
        r#"{ let _re = regex::Regex::new({s0}).expect("re.error: invalid pattern"); let _n = _re.find_iter({s2}).count() as i64; (_re.replace_all({s2}, {s1}).to_string(), _n) }"#,
        REGEX,
        |_| Type::Tuple(vec![Type::Str, Type::Int]),
    ),
    func(
        "re.split",
        &["pattern", "string"],
        r#"regex::Regex::new({s0}).expect("re.error: invalid pattern").split({s1}).map(|s| s.to_string()).collect::<Vec<String>>()"#,
        REGEX,
        |_| Type::list(Type::Str),
    ),
    func("re.escape", &["pattern"], "regex::escape({s0})", REGEX, |_| Type::Str),
    constant("re.IGNORECASE", "2_i64", None, |_| Type::Int),
    constant("re.I", "2_i64", None, |_| Type::Int),
    constant("re.MULTILINE", "8_i64", None, |_| Type::Int),
    constant("re.M", "8_i64", None, |_| Type::Int),
    constant("re.DOTALL", "16_i64", None, |_| Type::Int),
    constant("re.S", "16_i64", None, |_| Type::Int),
    // --- json ---
    func(
        "json.dumps",
        &["obj"],
        r#"serde_json::to_string({r0}).expect("TypeError: value is not JSON serializable")"#,
        JSON,
        |_| Type::Str,
    ),
    func(
        "json.dumps",
        &["obj", "indent"],
        r#"serde_json::to_string_pretty({r0}).expect("TypeError: value is not JSON serializable")"#,
        JSON,
        |_| Type::Str,
    ),
    func(
        "json.loads",
        &["s"],
        r#"serde_json::from_str::<serde_json::Value>({s0}).expect("json.JSONDecodeError: invalid JSON")"#,
        JSON,
        |_| Type::Native("json.Value".to_string()),
    ),
    func(
        "json.dump",
        &["obj", "fp"],
        r#"serde_json::to_writer(&{p1}, {r0}).expect("TypeError: value is not JSON serializable")"#,
        JSON,
        |_| Type::None,
    ),
    func(
        "json.load",
        &["fp"],
        r#"serde_json::from_reader::<_, serde_json::Value>(&{p0}).expect("json.JSONDecodeError: invalid JSON")"#,
        JSON,
        |_| Type::Native("json.Value".to_string()),
    ),
    // --- base64 ---
    func(
        "base64.b64encode",
        &["data"],
        "base64::Engine::encode(&base64::engine::general_purpose::STANDARD, {r0}).into_bytes()",
        B64,
        |_| Type::Bytes,
    ),
    func(
        "base64.b64decode",
        &["data"],
        r#"base64::Engine::decode(&base64::engine::general_purpose::STANDARD, {r0}).expect("binascii.Error: invalid base64")"#,
        B64,
        |_| Type::Bytes,
    ),
    func(
        "base64.urlsafe_b64encode",
        &["data"],
        "base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE, {r0}).into_bytes()",
        B64,
        |_| Type::Bytes,
    ),
    func(
        "base64.urlsafe_b64decode",
        &["data"],
        r#"base64::Engine::decode(&base64::engine::general_purpose::URL_SAFE, {r0}).expect("binascii.Error: invalid base64")"#,
        B64,
        |_| Type::Bytes,
    ),
    // --- hashlib ---
    func(
        "hashlib.sha256",
        &["data"],
        "<sha2::Sha256 as sha2::Digest>::digest({r0}).to_vec()",
        Some(Dependency::Sha2),
        |_| Type::Native("hashlib.Hash".to_string()),
    ),
    func(
        "hashlib.sha224",
        &["data"],
        "<sha2::Sha224 as sha2::Digest>::digest({r0}).to_vec()",
        Some(Dependency::Sha2),
        |_| Type::Native("hashlib.Hash".to_string()),
    ),
    func(
        "hashlib.sha384",
        &["data"],
        "<sha2::Sha384 as sha2::Digest>::digest({r0}).to_vec()",
        Some(Dependency::Sha2),
        |_| Type::Native("hashlib.Hash".to_string()),
    ),
    func(
        "hashlib.sha512",
        &["data"],
        "<sha2::Sha512 as sha2::Digest>::digest({r0}).to_vec()",
        Some(Dependency::Sha2),
        |_| Type::Native("hashlib.Hash".to_string()),
    ),
    func(
        "hashlib.md5",
        &["data"],
        "<md5::Md5 as md5::Digest>::digest({r0}).to_vec()",
        Some(Dependency::Md5),
        |_| Type::Native("hashlib.Hash".to_string()),
    ),
    // --- time ---
    func(
        "time.time",
        &[],
        "std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)",
        None,
        |_| Type::Float,
    ),
    func(
        "time.time_ns",
        &[],
        "std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos() as i64).unwrap_or(0)",
        None,
        |_| Type::Int,
    ),
    func(
        "time.perf_counter",
        &[],
        "std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)",
        None,
        |_| Type::Float,
    ),
    func(
        "time.monotonic",
        &[],
        "std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_secs_f64()).unwrap_or(0.0)",
        None,
        |_| Type::Float,
    ),
    func(
        "time.sleep",
        &["secs"],
        "std::thread::sleep(std::time::Duration::from_secs_f64({f0}))",
        None,
        |_| Type::None,
    ),
    // --- random ---
    func("random.random", &[], "rand::random::<f64>()", RAND, |_| Type::Float),
    func(
        "random.randint",
        &["a", "b"],
        "rand::Rng::gen_range(&mut rand::thread_rng(), {i0}..={i1})",
        RAND,
        |_| Type::Int,
    ),
    func(
        "random.randrange",
        &["stop"],
        "rand::Rng::gen_range(&mut rand::thread_rng(), 0..{i0})",
        RAND,
        |_| Type::Int,
    ),
    func(
        "random.randrange",
        &["start", "stop"],
        "rand::Rng::gen_range(&mut rand::thread_rng(), {i0}..{i1})",
        RAND,
        |_| Type::Int,
    ),
    func(
        "random.uniform",
        &["a", "b"],
        "rand::Rng::gen_range(&mut rand::thread_rng(), {f0}..{f1})",
        RAND,
        |_| Type::Float,
    ),
    func(
        "random.choice",
        &["seq"],
        r#"rand::seq::SliceRandom::choose(&{p0}[..], &mut rand::thread_rng()).cloned().expect("IndexError: Cannot choose from an empty sequence")"#,
        RAND,
        |args| elem(args, 0),
    ),
    func(
        "random.shuffle",
        &["seq"],
        "rand::seq::SliceRandom::shuffle(&mut {p0}[..], &mut rand::thread_rng())",
        RAND,
        |_| Type::None,
    ),
    func(
        "random.sample",
        &["seq", "k"],
        "rand::seq::SliceRandom::choose_multiple(&{p0}[..], &mut rand::thread_rng(), {u1}).cloned().collect::<Vec<_>>()",
        RAND,
        |args| Type::list(elem(args, 0)),
    ),
    func("random.seed", &["a"], "{ let _ = {i0}; }", RAND, |_| Type::None),
    // --- subprocess ---
    func(
        "subprocess.run",
        &["args", "capture_output=false", "text=false", "check=false", "shell=false"],
        r#"{ let _cmd: Vec<String> = {0}; std::process::Command::new(&_cmd[0]).args(&_cmd[1..]).output().expect("OSError: failed to run command") }"#,
        None,
        |_| Type::Native("subprocess.CompletedProcess".to_string()),
    ),
    func(
        "subprocess.check_output",
        &["args", "text=false"],
        r#"{ let _cmd: Vec<String> = {0}; String::from_utf8_lossy(&std::process::Command::new(&_cmd[0]).args(&_cmd[1..]).output().expect("OSError: failed to run command").stdout).to_string() }"#,
        None,
        |_| Type::Str,
    ),
    func(
        "subprocess.call",
        &["args"],
        "{ let _cmd: Vec<String> = {0}; std::process::Command::new(&_cmd[0]).args(&_cmd[1..]).status().map(|s| s.code().unwrap_or(-1) as i64).unwrap_or(-1) }",
        None,
        |_| Type::Int,
    ),
    // --- pathlib ---
    func("pathlib.Path", &["path"], "std::path::PathBuf::from({s0})", None, |_| {
        Type::Native("pathlib.Path".to_string())
    }),
    func(
        "pathlib.Path.cwd",
        &[],
        "std::env::current_dir().unwrap_or_default()",
        None,
        |_| Type::Native("pathlib.Path".to_string()),
    ),
    func(
        "pathlib.Path.home",
        &[],
        r#"std::path::PathBuf::from(std::env::var("HOME").unwrap_or_default())"#,
        None,
        |_| Type::Native("pathlib.Path".to_string()),
    ),
    // --- collections ---
    func(
        "collections.Counter",
        &["iterable"],
        "{ let mut _c = HashMap::new(); for _x in {it0} { *_c.entry(_x).or_insert(0_i64) += 1; } _c }",
        Some(Dependency::HashMap),
        |args| Type::dict(elem(args, 0), Type::Int),
    ),
    func("collections.Counter", &[], "HashMap::new()", Some(Dependency::HashMap), |_| {
        Type::dict(Type::Unknown, Type::Int)
    }),
    func(
        "collections.defaultdict",
        &["default_factory"],
        "HashMap::new()",
        Some(Dependency::HashMap),
        |args| match args.first() {
            Some(Type::Callable { ret, .. }) => Type::dict(Type::Unknown, (**ret).clone()),
            _ => Type::dict(Type::Unknown, Type::Unknown),
        },
    ),
    func("collections.OrderedDict", &[], "HashMap::new()", Some(Dependency::HashMap), |_| {
        Type::dict(Type::Unknown, Type::Unknown)
    }),
    func("collections.deque", &[], "Vec::new()", None, |_| Type::list(Type::Unknown)),
    func(
        "collections.deque",
        &["iterable"],
        "{it0}.collect::<Vec<_>>()",
        None,
        |args| Type::list(elem(args, 0)),
    ),
    // --- itertools ---
    lazy("itertools.chain", &["a", "b"], "{it0}.chain({it1})", None, |args| {
        Type::list(join(&elem(args, 0), &elem(args, 1)))
    }),
    func(
        "itertools.product",
        &["a", "b"],
        "{ let _b: Vec<_> = {it1}.collect(); {it0}.flat_map(|x| _b.iter().cloned().map(move |y| (x.clone(), y))).collect::<Vec<_>>() }",
        None,
        |args| Type::list(Type::Tuple(vec![elem(args, 0), elem(args, 1)])),
    ),
    func(
        "itertools.permutations",
        &["iterable", "r"],
        "itertools::Itertools::permutations({it0}, {u1}).collect::<Vec<_>>()",
        Some(Dependency::Itertools),
        |args| Type::list(Type::list(elem(args, 0))),
    ),
    func(
        "itertools.permutations",
        &["iterable"],
        "{ let _v: Vec<_> = {it0}.collect(); let _n = _v.len(); itertools::Itertools::permutations(_v.into_iter(), _n).collect::<Vec<_>>() }",
        Some(Dependency::Itertools),
        |args| Type::list(Type::list(elem(args, 0))),
    ),
    func(
        "itertools.combinations",
        &["iterable", "r"],
        "itertools::Itertools::combinations({it0}, {u1}).collect::<Vec<_>>()",
        Some(Dependency::Itertools),
        |args| Type::list(Type::list(elem(args, 0))),
    ),
    lazy("itertools.count", &["start=0"], "({i0}..)", None, |_| Type::list(Type::Int)),
    lazy(
        "itertools.repeat",
        &["object", "times"],
        "std::iter::repeat({0}).take({u1})",
        None,
        |args| Type::list(arg(args, 0)),
    ),
    lazy(
        "itertools.cycle",
        &["iterable"],
        "{it0}.collect::<Vec<_>>().into_iter().cycle()",
        None,
        |args| Type::list(elem(args, 0)),
    ),
    lazy("itertools.islice", &["iterable", "stop"], "{it0}.take({u1})", None, |args| {
        Type::list(elem(args, 0))
    }),
    lazy(
        "itertools.islice",
        &["iterable", "start", "stop"],
        "{it0}.skip({u1}).take(({i2} - {i1}) as usize)",
        None,
        |args| Type::list(elem(args, 0)),
    ),
    lazy(
        "itertools.accumulate",
        &["iterable"],
        "{it0}.scan(None, |_acc, _x| { let _v = match *_acc { Some(_a) => _a + _x, None => _x }; *_acc = Some(_v); Some(_v) })",
        None,
        |args| Type::list(elem(args, 0)),
    ),
    lazy(
        "itertools.takewhile",
        &["predicate", "iterable"],
        "{it1}.take_while(|_x| ({p0})(_x.clone()))",
        None,
        |args| Type::list(elem(args, 1)),
    ),
    lazy(
        "itertools.dropwhile",
        &["predicate", "iterable"],
        "{it1}.skip_while(|_x| ({p0})(_x.clone()))",
        None,
        |args| Type::list(elem(args, 1)),
    ),
    // --- functools / copy / statistics ---
    func(
        "functools.reduce",
        &["function", "iterable"],
        r#"{it1}.reduce(|_a, _b| ({p0})(_a, _b)).expect("TypeError: reduce() of empty iterable")"#,
        None,
        |args| elem(args, 1),
    ),
    func(
        "functools.reduce",
        &["function", "iterable", "initial"],
        "{it1}.fold({2}, |_a, _b| ({p0})(_a, _b))",
        None,
        |args| arg(args, 2),
    ),
    func("copy.copy", &["x"], "{0}", None, |args| arg(args, 0)),
    func("copy.deepcopy", &["x"], "{0}", None, |args| arg(args, 0)),
    func(
        "statistics.mean",
        &["data"],
        "{ let _v: Vec<f64> = {it0}.map(|x| x as f64).collect(); _v.iter().sum::<f64>() / _v.len() as f64 }",
        None,
        |_| Type::Float,
    ),
    // --- datetime ---
    func(
        "datetime.datetime.now",
        &[],
        "chrono::Local::now().naive_local()",
        CHRONO,
        |_| Type::Native("datetime.datetime".to_string()),
    ),
    func(
        "datetime.date.today",
        &[],
        "chrono::Local::now().date_naive()",
        CHRONO,
        |_| Type::Native("datetime.date".to_string()),
    ),
    func(
        "datetime.datetime",
        &["year", "month", "day", "hour=0", "minute=0", "second=0"],
        r#"chrono::NaiveDate::from_ymd_opt({i0} as i32, {i1} as u32, {i2} as u32).and_then(|_d| _d.and_hms_opt({i3} as u32, {i4} as u32, {i5} as u32)).expect("ValueError: invalid datetime")"#,
        CHRONO,
        |_| Type::Native("datetime.datetime".to_string()),
    ),
    func(
        "datetime.date",
        &["year", "month", "day"],
        r#"chrono::NaiveDate::from_ymd_opt({i0} as i32, {i1} as u32, {i2} as u32).expect("ValueError: invalid date")"#,
        CHRONO,
        |_| Type::Native("datetime.date".to_string()),
    ),
    func(
        "datetime.timedelta",
        &[
            "days=0",
            "seconds=0",
            "microseconds=0",
            "milliseconds=0",
            "minutes=0",
            "hours=0",
            "weeks=0",
        ],
        "chrono::Duration::days({i0}) + chrono::Duration::seconds({i1}) + chrono::Duration::microseconds({i2}) + chrono::Duration::milliseconds({i3}) + chrono::Duration::minutes({i4}) + chrono::Duration::hours({i5}) + chrono::Duration::weeks({i6})",
        CHRONO,
        |_| Type::Native("datetime.timedelta".to_string()),
    ),
    func(
        "datetime.datetime.fromisoformat",
        &["date_string"],
        r#"chrono::NaiveDateTime::parse_from_str({s0}, "%Y-%m-%dT%H:%M:%S").expect("ValueError: invalid isoformat string")"#,
        CHRONO,
        |_| Type::Native("datetime.datetime".to_string()),
    ),
    func(
        "datetime.datetime.strptime",
        &["date_string", "format"],
        r#"chrono::NaiveDateTime::parse_from_str({s0}, {s1}).expect("ValueError: time data does not match format")"#,
        CHRONO,
        |_| Type::Native("datetime.datetime".to_string()),
    ),
    // --- asyncio ---
    func(
        "asyncio.run",
        &["main"],
        r#"tokio::runtime::Runtime::new().expect("failed to start async runtime").block_on(async { {p0}.await })"#,
        Some(Dependency::Tokio),
        |args| arg(args, 0),
    ),
    func(
        "asyncio.sleep",
        &["delay"],
        "tokio::time::sleep(std::time::Duration::from_secs_f64({f0}))",
        Some(Dependency::Tokio),
        |_| Type::None,
    ),
    special("asyncio.gather", &["*"], Some(Dependency::Tokio), |args| {
        Type::Tuple(args.to_vec())
    }),
    // --- argparse ---
    special("argparse.ArgumentParser", &["*"], Some(Dependency::Clap), |_| {
        Type::Native("argparse.ArgumentParser".to_string())
    }),
    // --- string ---
    constant(
        "string.ascii_lowercase",
        "\"abcdefghijklmnopqrstuvwxyz\".to_string()",
        None,
        |_| Type::Str,
    ),
    constant(
        "string.ascii_uppercase",
        "\"ABCDEFGHIJKLMNOPQRSTUVWXYZ\".to_string()",
        None,
        |_| Type::Str,
    ),
    constant(
        "string.ascii_letters",
        "\"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\".to_string()",
        None,
        |_| Type::Str,
    ),
    constant("string.digits", "\"0123456789\".to_string()", None, |_| Type::Str),
    constant(
        "string.punctuation",
        r##""!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~".to_string()"##,
        None,
        |_| Type::Str,
    ),
];

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_every_entry_has_a_template() {
        for spec in MODULE_SPECS {
            if spec.kind != EntryKind::Special {
                assert!(!spec.template.is_empty(), "{} has no template", spec.path);
            }
        }
    }

    #[test]
    fn test_no_duplicate_arity() {
        let mut seen = HashSet::new();
        for spec in MODULE_SPECS {
            let key = (spec.path, spec.params.len(), spec.kind == EntryKind::Constant);
            assert!(seen.insert(key), "duplicate entry for {}", spec.path);
        }
    }

    #[test]
    fn test_families_covered() {
        for family in [
            "math.", "os.", "os.path.", "os.environ", "re.", "json.", "base64.", "hashlib.",
            "time.", "random.", "subprocess.", "pathlib.", "collections.", "itertools.",
            "datetime.", "asyncio.", "argparse.",
        ] {
            assert!(
                MODULE_SPECS.iter().any(|s| s.path.starts_with(family)),
                "no entries for {family}"
            );
        }
    }
}
