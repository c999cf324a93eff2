//! Built-in pregnancy-risk questionnaire.

use super::chain::Chain;
use super::steps::{Choice, StepSpec};
use crate::error::QuestionnaireError;

const CONSENT: &str = "Приветствуем вас в нашем боте прогнозирования внутриутробной гибели плода. \
Мы понимаем, что это чувствительная тема, и мы здесь, чтобы предоставить вам информацию и поддержку.

Наш бот основан на современных методах анализа данных и медицинских исследованиях. \
Мы стремимся предоставить вам точные и надежные прогнозы, которые могут помочь вам принимать \
информированные решения относительно вашего здоровья и беременности.

Пожалуйста, помните, что результаты, предоставленные ботом, не заменяют консультацию с \
квалифицированным врачом. Если у вас есть какие-либо вопросы или беспокойства, рекомендуем \
обсудить их с вашим врачом.

*Для начала использования бота и получения прогнозов, вы должны согласиться на обработку \
персональных данных. Нажмите кнопку \"Согласен\".*";

const START: &str = "Вы согласились на обработку персональных данных!

*Для начала использования бота и получения прогнозов, пожалуйста, нажмите кнопку \"Начать\".*";

const TEXT_INTRO: &str = "*Далее последуют вопросы, на которые требуется ответить развернуто. \
Пишите всё, что считаете необходимым.

Если вам нечего ответить поставьте прочерк.*";

const FINISH: &str = "Благодарим вас за предоставленные данные. 🌟 Ваши ответы были успешно \
отправлены врачу для дополнительной проверки. Пожалуйста, дождитесь окончательного результата, \
который будет доступен в ближайшее время.

Мы готовы продолжить поддерживать вас на каждом этапе вашего пути к здоровой беременности. \
В случае дополнительных вопросов не забывайте обращаться к вашему врачу для профессиональной \
консультации.

Чтобы начать новую консультацию или обновить текущие данные, нажмите кнопку \"Начать\"";

/// Number of consent screens a restart skips.
pub const BODY_START: usize = 2;

/// (field, prompt, echo subject) for each yes/no question, grouped by block.
type YesNo = (&'static str, &'static str, &'static str);

const FETAL: &[YesNo] = &[
    (
        "isCongenitalMalformations",
        "Наблюдались ли врожденные пороки развития?",
        "о врожденных пороках развития",
    ),
    ("isAcuteInfections", "Наблюдались ли острые инфекции?", "об острых инфекциях"),
    ("isNonimmuneHydrops", "Наблюдалась ли неиммунная водянка?", "о неиммунной водянке"),
    ("isIsoimmunization", "Наблюдалась ли изоиммунизация?", "об изоиммунизации"),
    (
        "isMaternalFetalHemorrhage",
        "Наблюдалось ли плодово-материнское кровотечение?",
        "о плодово-материнском кровотечении",
    ),
    (
        "isFetoFetalTransfusionSyndrome",
        "Наблюдался ли фето-фетальный трансфузионный синдром?",
        "о фето-фетальном трансфузионном синдроме",
    ),
    ("isFetalGrowthRestriction", "Наблюдалась ли задержка роста плода?", "о задержке роста плода"),
];

const UMBILICAL: &[YesNo] = &[
    ("isProlapse", "Наблюдалось ли выпадение пуповины?", "о выпадении пуповины"),
    ("isUmbilicalCoilingKnot", "Наблюдалось ли обвитие/узел пуповины?", "об обвитии/узле пуповины"),
    (
        "isVelamentousInsertion",
        "Наблюдалось ли оболочечное прикрепление пуповины?",
        "об оболочечном прикреплении пуповины",
    ),
    ("isShortUmbilicalCord", "Наблюдается ли короткая пуповина?", "о короткой пуповине"),
];

const PLACENTAL: &[YesNo] = &[
    ("isPlacentalAbruption", "Наблюдалась ли отслойка плаценты?", "об отслойке плаценты"),
    ("isPlacentalPrevia", "Наблюдалось ли предлежание плаценты?", "о предлежании плаценты"),
    (
        "isVascularCordProlapse",
        "Наблюдалось ли предлежание сосудов пуповины?",
        "о предлежании сосудов пуповины",
    ),
    (
        "isPlacentalInsufficiency",
        "Наблюдалась ли плацентарная недостаточность?",
        "о плацентарной недостаточности",
    ),
];

const AMNIOTIC: &[YesNo] = &[
    ("isChorioamnionitis", "Наблюдался ли хориоамнионит?", "о хориоамнионите"),
    ("isOligohydramnios", "Наблюдался ли олигоамнион (маловодие)?", "об олигоамнионе (маловодии)"),
    (
        "isPolyhydramnios",
        "Наблюдался ли полигидрамнион (многоводие)?",
        "о полигидрамнионе (многоводии)",
    ),
];

const MATERNAL: &[YesNo] = &[
    (
        "isAsphyxia",
        "Наблюдалась ли интранатальная (во время родов) асфиксия?",
        "об интранатальной асфиксии",
    ),
    (
        "isBirthTrauma",
        "Наблюдалась ли интранатальная (во время родов) родовая травма?",
        "об интранатальной родовой травме",
    ),
    ("isExternalInjury", "Наблюдалась ли внешняя травма?", "о внешней травме"),
    ("isIatrogenicInjury", "Наблюдалась ли ятрогенная травма?", "о ятрогенной травме"),
    ("isUterineRupture", "Наблюдался ли разрыв матки?", "о разрыве матки"),
    (
        "isUterineMalformations",
        "Наблюдались ли немодифицируемые пороки развития/строения матки?",
        "о немодифицируемых пороках развития/строения матки",
    ),
    (
        "isSubstanceAbuse",
        "Употребляете/употребляли ли вы наркотические средства?",
        "об употреблении наркотических средств",
    ),
    ("isTobaccoConsumption", "Употребляете/употребляли ли вы табак?", "о потреблении табака"),
    ("isAlcoholConsumption", "Злоупотребляете ли вы алкоголем?", "о злоупотреблении алкоголем"),
];

/// (block step name, header, questions)
const BLOCKS: &[(&str, &str, &[YesNo])] = &[
    ("fetalBlock", "*🔎 Блок вопросов: плодовые факторы риска.*", FETAL),
    ("umbilicalBlock", "*🔎 Блок вопросов: пуповинные факторы риска.*", UMBILICAL),
    ("placentalBlock", "*🔎 Блок вопросов: плацентарные факторы риска.*", PLACENTAL),
    (
        "amnioticBlock",
        "*🔎 Блок вопросов: факторы, связанные с патологией амниотической жидкости.*",
        AMNIOTIC,
    ),
    ("maternalBlock", "*🔎 Блок вопросов: материнские факторы риска.*", MATERNAL),
];

/// (field, prompt) for the free-text disease-class questions.
const DISEASE_CLASSES: &[(&str, &str)] = &[
    ("infectiousAndParasitic", "Перечислите инфекционные и паразитарные болезни:"),
    (
        "bloodAndImmuneSystem",
        "Перечислите болезни крови, кроветворных органов и отдельные нарушения, вовлекающие иммунный механизм:",
    ),
    (
        "endocrineSystem",
        "Перечислите болезни эндокринной системы, расстройства питания и нарушения обмена веществ:",
    ),
    ("nervousSystem", "Перечислите болезни нервной системы:"),
    ("circulatorySystem", "Перечислите болезни системы кровообращения:"),
    ("respiratorySystem", "Перечислите болезни органов дыхания:"),
    ("digestiveSystem", "Перечислите болезни органов пищеварения:"),
    (
        "musculoskeletalSystem",
        "Перечислите болезни костно-мышечной системы и соединительной ткани:",
    ),
    ("genitourinarySystem", "Перечислите болезни мочеполовой системы:"),
    ("congenitalAnomalies", "Перечислите врожденные аномалии, деформации и хромосомные нарушения:"),
    (
        "externalCauses",
        "Перечислите травмы, отравления и некоторые другие последствия воздействия внешних причин:",
    ),
];

fn start_choice() -> Choice {
    Choice::new("Начать 🚀", "начать")
}

/// The full step table in order.
pub fn steps() -> Vec<StepSpec> {
    let mut steps = vec![
        StepSpec::gate("consent", CONSENT, Choice::new("Согласен 🟢", "согласен")).markdown(),
        StepSpec::gate("start", START, start_choice()).markdown(),
    ];

    for (name, header, questions) in BLOCKS {
        steps.push(StepSpec::info(*name, *header).markdown());
        steps.extend(questions.iter().map(|(field, prompt, subject)| {
            StepSpec::yes_no(*field, *prompt, format!("На вопрос {subject} вы ответили: "))
        }));
    }

    steps.push(StepSpec::info("textIntro", TEXT_INTRO).markdown());
    steps.extend(
        DISEASE_CLASSES
            .iter()
            .map(|(field, prompt)| StepSpec::text(*field, *prompt)),
    );
    steps.push(StepSpec::text(
        "comment",
        "Если у вас остались вопросы/комментарии задайте их:",
    ));
    steps.push(StepSpec::finish("finish", FINISH, start_choice()).markdown());
    steps
}

/// The built-in questionnaire as a validated chain.
pub fn pregnancy_risk() -> Result<Chain, QuestionnaireError> {
    Chain::new(steps(), BODY_START)
}
