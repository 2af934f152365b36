use colored::{ColoredString, Colorize};
use labforge_cloud::{ActionType, StageOutcome};

/// アクション種別を色付きで表示用に整形
pub fn action_label(action: ActionType) -> ColoredString {
    let label = format!("{:<8}", action.to_string());
    match action {
        ActionType::Create => label.green().bold(),
        ActionType::Adopt => label.cyan(),
        ActionType::Converge => label.yellow(),
        ActionType::NoOp => label.dimmed(),
    }
}

/// ステージ結果を1行で表示
pub fn print_outcome(outcome: &StageOutcome) {
    println!(
        "  {} {:<22} {} {}",
        "✓".green(),
        outcome.stage.name(),
        action_label(outcome.action),
        outcome.resource_id.cyan()
    );
    if !outcome.description.is_empty() {
        println!("    {}", outcome.description.dimmed());
    }
}

/// 機密値を伏せ字にする
pub fn redact(value: &str) -> String {
    "*".repeat(value.chars().count().clamp(4, 12))
}

/// シェル用にエスケープ (安全な文字だけの引数はそのまま)
pub fn shell_escape(s: &str) -> String {
    let safe = !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@%+".contains(c));
    if safe {
        return s.to_string();
    }
    // シングルクォートでラップしてエスケープ
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// 引数列をリモートのコマンドラインにする
///
/// 引数が1つだけならシェルのコマンドラインとしてそのまま渡す
/// (`labforge exec -- 'ls | wc -l'`)。複数なら各引数をクォートする。
pub fn shell_join(args: &[String]) -> String {
    match args {
        [single] => single.clone(),
        _ => args
            .iter()
            .map(|arg| shell_escape(arg))
            .collect::<Vec<_>>()
            .join(" "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_shell_escape() {
        assert_eq!(shell_escape("hello"), "hello");
        assert_eq!(shell_escape("a  b"), "'a  b'");
        assert_eq!(shell_escape("it's"), "'it'\\''s'");
        assert_eq!(shell_escape(""), "''");
        assert_eq!(shell_escape("$HOME"), "'$HOME'");
    }

    #[test]
    fn test_shell_join_keeps_argument_boundaries() {
        // 空白を含む引数がリモートで分割されない
        assert_eq!(shell_join(&args(&["echo", "a  b"])), "echo 'a  b'");
        assert_eq!(
            shell_join(&args(&["kubectl", "get", "pods", "-n", "kube-system"])),
            "kubectl get pods -n kube-system"
        );
        // 1引数はコマンドラインとしてそのまま
        assert_eq!(shell_join(&args(&["ls | wc -l"])), "ls | wc -l");
    }

    #[test]
    fn test_redact_hides_length_beyond_bounds() {
        assert_eq!(redact("ab"), "****");
        assert_eq!(redact("abcdef"), "******");
        assert_eq!(redact(&"x".repeat(40)), "*".repeat(12));
    }
}
