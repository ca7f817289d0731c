//! Python interpreter kernel: subprocess bootstrap and NDJSON protocol.

use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use super::KernelTransport;
use crate::error::{Error, Result};
use crate::notebook::Output;

/// Interpreter-side program. Reads one JSON request per line from stdin,
/// executes the code in a shared globals dict, and writes one JSON
/// response per line: `{"id": n, "outputs": [...]}` with entries shaped
/// like ipynb outputs. A trailing expression feeds the result channel;
/// the `__nbt_encode` helper marks its value for payload transfer.
const BOOTSTRAP: &str = r#"
import ast, io, json, sys, traceback

class _NbtPayload:
    def __init__(self, text):
        self.text = text

def __nbt_encode(value):
    return _NbtPayload(json.dumps(value))

def __nbt_decode(text):
    return json.loads(text)

_GLOBALS = {
    '__name__': '__main__',
    '__nbt_encode': __nbt_encode,
    '__nbt_decode': __nbt_decode,
}

def _run(code):
    outputs = []
    captured_out, captured_err = io.StringIO(), io.StringIO()
    previous = sys.stdout, sys.stderr
    sys.stdout, sys.stderr = captured_out, captured_err
    try:
        tree = ast.parse(code)
        trailing = None
        if tree.body and isinstance(tree.body[-1], ast.Expr):
            trailing = ast.Expression(tree.body.pop(-1).value)
        exec(compile(tree, '<cell>', 'exec'), _GLOBALS)
        if trailing is not None:
            value = eval(compile(trailing, '<cell>', 'eval'), _GLOBALS)
            if isinstance(value, _NbtPayload):
                outputs.append({'output_type': 'execute_result',
                                'data': {'application/x-nbtest-payload': value.text}})
            elif value is not None:
                outputs.append({'output_type': 'execute_result',
                                'data': {'text/plain': repr(value)}})
    except BaseException as exc:
        outputs.append({'output_type': 'error',
                        'ename': type(exc).__name__,
                        'evalue': str(exc),
                        'traceback': traceback.format_exception(type(exc), exc, exc.__traceback__)})
    finally:
        sys.stdout, sys.stderr = previous
    if captured_out.getvalue():
        outputs.insert(0, {'output_type': 'stream', 'name': 'stdout', 'text': captured_out.getvalue()})
    if captured_err.getvalue():
        outputs.insert(0, {'output_type': 'stream', 'name': 'stderr', 'text': captured_err.getvalue()})
    return outputs

for _line in sys.stdin:
    _line = _line.strip()
    if not _line:
        continue
    _req = json.loads(_line)
    _resp = {'id': _req['id'], 'outputs': _run(_req['code'])}
    sys.stdout.write(json.dumps(_resp) + '\n')
    sys.stdout.flush()
"#;

#[derive(Serialize)]
struct Request<'a> {
    id: u64,
    code: &'a str,
}

#[derive(Deserialize)]
struct Response {
    id: u64,
    outputs: Vec<Output>,
}

struct IoRequest {
    id: u64,
    code: String,
    reply: oneshot::Sender<Result<Vec<Output>>>,
}

struct Running {
    child: Child,
    requests: mpsc::Sender<IoRequest>,
}

/// One Python subprocess, exclusively owned by one session.
///
/// All pipe traffic happens on a dedicated task, so a caller abandoning
/// an execution (timeout, cancellation) never leaves a half-written
/// request or half-read response on the wire: the round trip in flight
/// completes and only its result is discarded.
pub struct PythonKernel {
    python: String,
    timeout: Duration,
    next_id: u64,
    running: Option<Running>,
}

impl PythonKernel {
    pub fn new(python: impl Into<String>, timeout: Duration) -> Self {
        Self {
            python: python.into(),
            timeout,
            next_id: 0,
            running: None,
        }
    }

    async fn spawn(&mut self) -> Result<()> {
        let mut cmd = Command::new(&self.python);
        cmd.arg("-u")
            .arg("-c")
            .arg(BOOTSTRAP)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::transport("kernel stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::transport("kernel stdout unavailable"))?;

        let (tx, rx) = mpsc::channel(1);
        tokio::spawn(io_loop(stdin, BufReader::new(stdout), rx));

        debug!(python = %self.python, "kernel started");
        self.running = Some(Running {
            child,
            requests: tx,
        });
        Ok(())
    }
}

/// Owns the kernel pipes. Requests are served strictly in order; a reply
/// whose receiver has gone away is dropped. Exits when the request
/// channel closes or the stream dies, and dropping stdin then ends the
/// bootstrap loop.
async fn io_loop(
    mut stdin: ChildStdin,
    mut stdout: BufReader<ChildStdout>,
    mut requests: mpsc::Receiver<IoRequest>,
) {
    while let Some(req) = requests.recv().await {
        let outcome = round_trip(&mut stdin, &mut stdout, req.id, &req.code).await;
        let fatal = outcome.is_err();
        let _ = req.reply.send(outcome);
        if fatal {
            break;
        }
    }
    while let Some(req) = requests.recv().await {
        let _ = req.reply.send(Err(Error::transport("kernel stream closed")));
    }
}

async fn round_trip(
    stdin: &mut ChildStdin,
    stdout: &mut BufReader<ChildStdout>,
    id: u64,
    code: &str,
) -> Result<Vec<Output>> {
    let mut line = serde_json::to_string(&Request { id, code })
        .map_err(|e| Error::transport(e.to_string()))?;
    line.push('\n');
    stdin.write_all(line.as_bytes()).await?;
    stdin.flush().await?;

    let mut buf = String::new();
    loop {
        buf.clear();
        let n = stdout.read_line(&mut buf).await?;
        if n == 0 {
            return Err(Error::transport("kernel exited unexpectedly"));
        }
        let resp: Response = serde_json::from_str(buf.trim_end())
            .map_err(|e| Error::transport(format!("malformed kernel response: {e}")))?;
        if resp.id == id {
            return Ok(resp.outputs);
        }
    }
}

impl KernelTransport for PythonKernel {
    fn start(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.running.is_some() {
                return Err(Error::lifecycle("kernel already started"));
            }
            self.spawn().await
        })
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if let Some(Running { mut child, requests }) = self.running.take() {
                // once the I/O task drains its queue it drops stdin,
                // which ends the bootstrap loop
                drop(requests);
                match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                    Ok(status) => {
                        status?;
                    }
                    Err(_) => {
                        child.start_kill()?;
                        child.wait().await?;
                    }
                }
                info!("kernel stopped");
            }
            Ok(())
        })
    }

    fn execute<'a>(
        &'a mut self,
        source: &'a str,
        position: usize,
    ) -> BoxFuture<'a, Result<Vec<Output>>> {
        Box::pin(async move {
            let id = self.next_id;
            self.next_id += 1;

            let running = self
                .running
                .as_ref()
                .ok_or_else(|| Error::transport("kernel not running"))?;

            debug!(position, bytes = source.len(), "executing cell");
            let (reply_tx, reply_rx) = oneshot::channel();
            running
                .requests
                .send(IoRequest {
                    id,
                    code: source.to_string(),
                    reply: reply_tx,
                })
                .await
                .map_err(|_| Error::transport("kernel I/O task stopped"))?;

            match tokio::time::timeout(self.timeout, reply_rx).await {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(_)) => Err(Error::transport("kernel exited unexpectedly")),
                Err(_) => Err(Error::transport(format!("cell {position} timed out"))),
            }
        })
    }
}
