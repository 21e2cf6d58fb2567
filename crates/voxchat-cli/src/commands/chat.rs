//! Interactive chat loop

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;
use voxchat_core::{
    Completion, Conversation, LlmService, PromptTemplate, Result, Settings, VoiceChat,
    VoiceService,
};

pub const DEFAULT_SYSTEM_PROMPT: &str = "システム: あなたはツンデレな性格の女の子として応答してください。ユーザーに対して少し冷たく、でも時々優しさを見せるような態度で話してください。";

pub struct ChatArgs {
    pub model: PathBuf,
    pub n_gpu_layers: i32,
    pub n_ctx: u32,
    pub n_threads: Option<u32>,
    pub verbose: bool,
    pub system: String,
    pub max_tokens: usize,
    pub speak: bool,
    pub voice_model_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl ChatArgs {
    fn settings(&self) -> Settings {
        Settings {
            llm_model_path: self.model.clone(),
            n_gpu_layers: self.n_gpu_layers,
            n_ctx: self.n_ctx,
            n_threads: self.n_threads,
            llm_verbose: self.verbose,
            max_tokens: self.max_tokens,
            default_voice_model_dir: self.voice_model_dir.clone(),
            output_dir: self.output_dir.clone(),
            ..Settings::from_env()
        }
    }
}

/// `exit` and `quit` end the session, in any case.
pub fn is_exit_command(input: &str) -> bool {
    let input = input.trim();
    input.eq_ignore_ascii_case("exit") || input.eq_ignore_ascii_case("quit")
}

/// Prompt construction and history for one terminal session.
pub struct ChatSession {
    template: PromptTemplate,
    system: String,
    conversation: Conversation,
}

impl ChatSession {
    pub fn new(system: impl Into<String>, n_ctx: u32) -> Self {
        Self {
            template: PromptTemplate::default(),
            system: system.into(),
            conversation: Conversation::new(n_ctx),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn prompt_for(&self, input: &str) -> String {
        self.template
            .with_history(&self.system, self.conversation.window(), input)
    }

    /// Run one exchange, streaming reply text to `on_text`, and record it.
    pub async fn turn<F>(&mut self, llm: &LlmService, input: &str, on_text: F) -> Result<Completion>
    where
        F: FnMut(&str) + Send + 'static,
    {
        let prompt = self.prompt_for(input);
        debug!("Prompt is {} chars", prompt.chars().count());

        let completion = llm.stream(prompt, on_text).await?;
        self.conversation.record(input, &completion.text);
        Ok(completion)
    }
}

fn print_flush(text: &str) {
    let mut stdout = std::io::stdout();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

pub async fn execute(args: ChatArgs) -> anyhow::Result<ExitCode> {
    let settings = args.settings();

    println!("ℹ️ モデルをロード中: {}", settings.llm_model_path.display());
    println!(
        "ℹ️ GPU層数: {}, コンテキスト: {}, スレッド数: {}",
        settings.n_gpu_layers,
        settings.n_ctx,
        settings
            .n_threads
            .map(|t| t.to_string())
            .unwrap_or_else(|| "自動".to_string())
    );

    let started = Instant::now();
    let llm = Arc::new(LlmService::llama_cpp(&settings));
    if let Err(e) = llm.load().await {
        println!("❌ モデルのロード中にエラーが発生しました: {}", e);
        println!("❌ VRAM不足の可能性があります。n_gpu_layersを減らすか、モデルパスを確認してください。");
        return Ok(ExitCode::FAILURE);
    }
    println!(
        "✅ モデルがロードされました (所要時間: {:.2}秒)",
        started.elapsed().as_secs_f64()
    );

    let voice = if args.speak {
        tokio::fs::create_dir_all(&settings.output_dir).await?;
        let voice = Arc::new(VoiceService::sbv2_worker(&settings));
        if let Err(e) = voice.load(&settings.default_voice_model_dir).await {
            println!("⚠️ 音声モデルをロードできませんでした: {}", e);
        }
        Some(VoiceChat::new(llm.clone(), voice, &settings))
    } else {
        None
    };

    let mut session = ChatSession::new(args.system, settings.n_ctx);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("🤖 対話を開始します。終了するには 'exit' または 'quit' と入力してください。");

    loop {
        print_flush("👤 あなた: ");

        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 中断しました。");
                break;
            }
        };

        let Some(input) = line else {
            println!("\n👋 さようなら！");
            break;
        };
        if is_exit_command(&input) {
            println!("👋 さようなら！");
            break;
        }

        print_flush("🤖 アシスタント: ");
        let started = Instant::now();

        let result = tokio::select! {
            result = session.turn(&llm, &input, print_flush) => result,
            _ = tokio::signal::ctrl_c() => {
                println!("\n👋 中断しました。");
                break;
            }
        };

        let completion = match result {
            Ok(completion) => completion,
            Err(e) => {
                println!("\n❌ ループ中にエラーが発生しました: {}", e);
                break;
            }
        };
        println!(
            "\n\n⏱️ 推論時間: {:.2}秒",
            started.elapsed().as_secs_f64()
        );
        debug!(
            "{} tokens at {:.1} tok/s",
            completion.completion_tokens,
            completion.tokens_per_second()
        );

        if let Some(voice) = &voice {
            let reply = completion.text.trim();
            if !reply.is_empty() {
                match voice.speak(reply).await {
                    Ok(file) => println!("🔊 {}", settings.output_dir.join(file).display()),
                    Err(e) => println!("⚠️ 音声合成に失敗しました: {}", e),
                }
            }
        }
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use voxchat_core::testing::ScriptedGenerator;
    use voxchat_core::SamplingParams;

    #[test]
    fn exit_words_are_case_insensitive() {
        assert!(is_exit_command("exit"));
        assert!(is_exit_command("QUIT"));
        assert!(is_exit_command("  Exit \n"));
        assert!(!is_exit_command("exit now"));
        assert!(!is_exit_command(""));
    }

    #[test]
    fn first_prompt_has_system_block_only() {
        let session = ChatSession::new("システム: 短く答えて。", 2048);
        assert_eq!(
            session.prompt_for("やあ"),
            "システム: 短く答えて。\n\nユーザー: やあ\nアシスタント: "
        );
    }

    #[tokio::test]
    async fn turns_feed_the_history_window() {
        let generator = ScriptedGenerator::new("べつに。 ユーザー: まだ続く");
        let llm = LlmService::preloaded(generator.clone(), SamplingParams::default());
        let mut session = ChatSession::new("", 2048);
        let streamed = Arc::new(Mutex::new(String::new()));

        let sink = streamed.clone();
        let completion = session
            .turn(&llm, "元気？", move |piece| sink.lock().unwrap().push_str(piece))
            .await
            .unwrap();
        assert_eq!(completion.text.trim(), "べつに。");
        assert_eq!(streamed.lock().unwrap().trim(), "べつに。");

        session.turn(&llm, "本当？", |_| {}).await.unwrap();

        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(
            prompts[1],
            "ユーザー: 元気？\nアシスタント: べつに。\nユーザー: 本当？\nアシスタント: "
        );
        assert_eq!(session.conversation().turns().len(), 4);
    }

    #[tokio::test]
    async fn small_context_keeps_only_latest_turn() {
        let llm = LlmService::preloaded(ScriptedGenerator::new("ok"), SamplingParams::default());
        let mut session = ChatSession::new("", 512);
        assert_eq!(session.conversation().max_history_turns(), 1);

        session.turn(&llm, "one", |_| {}).await.unwrap();
        session.turn(&llm, "two", |_| {}).await.unwrap();

        assert_eq!(
            session.prompt_for("three"),
            "アシスタント: ok\nユーザー: three\nアシスタント: "
        );
    }
}
