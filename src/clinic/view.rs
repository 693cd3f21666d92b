use teloxide::utils::html::escape;

use super::controller::{GameController, Verdict};
use super::{Case, GameStats};

pub const START_BUTTON: &str = "开始接诊 (START)";
pub const NEXT_BUTTON: &str = "下一位病人 (NEXT) ->";
pub const FINISH_BUTTON: &str = "查看结果 (FINISH)";
pub const RETRY_BUTTON: &str = "再次挑战 (RETRY)";

pub const MENU_TEXT: &str = "<b>中医诊室 · TCM DIAGNOSIS SIM</b>\n\n\
欢迎来到模拟诊所。\n请根据病人的<b>面色</b>、<b>舌象</b>、<b>脉象</b>及<b>主诉</b>进行辨证。";
pub const LOADING_TEXT: &str = "病人正在入场...";
pub const WAIT_TEXT: &str = "病人正在入场，请稍候。";
pub const PICK_OPTION_TEXT: &str = "请从下面的选项中选择一个诊断。";

const LIFE: &str = "❤️";

pub fn header(stats: &GameStats) -> String {
    format!(
        "SCORE {:05}  {}",
        stats.score,
        LIFE.repeat(stats.remaining_lives())
    )
}

pub fn case_card(stats: &GameStats, case: &Case) -> String {
    format!(
        "{}\n\n<b>病人：{}</b>\n面色：{}\n舌象：{}\n脉象：{}\n\n<i>“{}”</i>\n\n请辨证：",
        header(stats),
        escape(&case.patient_name),
        escape(&case.observations.face),
        escape(&case.observations.tongue),
        escape(&case.observations.pulse),
        escape(&case.complaint),
    )
}

pub fn feedback(controller: &GameController) -> Option<String> {
    let case = controller.case()?;
    let verdict = controller.verdict()?;
    let selected = controller.selected()?;

    let title = match verdict {
        Verdict::Correct { points } => format!(
            "<b>诊断正确 (CORRECT)</b> +{}\n太棒了！辨证准确。",
            points
        ),
        Verdict::Wrong => format!(
            "<b>诊断错误 (WRONG)</b>\n很遗憾。正确诊断应为：{}",
            escape(&case.correct_diagnosis)
        ),
    };

    Some(format!(
        "{}\n\n你的诊断：{}\n{}\n\n<b>【解析 Explanation】</b>\n{}",
        header(controller.stats()),
        escape(selected),
        title,
        escape(&case.explanation)
    ))
}

pub fn next_button(stats: &GameStats) -> &'static str {
    if stats.is_out_of_lives() {
        FINISH_BUTTON
    } else {
        NEXT_BUTTON
    }
}

pub fn game_over(stats: &GameStats) -> String {
    format!("<b>GAME OVER</b>\n\n最终得分：<b>{}</b>", stats.score)
}
