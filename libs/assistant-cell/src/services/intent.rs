// libs/assistant-cell/src/services/intent.rs
//
// Fuzzy, accent-tolerant intent detection. Categories are independent and
// non-exclusive; the dialogue engine decides priority between them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    Availability,
    Booking,
    CabinetInfo,
    Cancellation,
    Greeting,
    Farewell,
    Thanks,
    MyAppointments,
    Help,
}

impl Intent {
    pub fn label(&self) -> &'static str {
        match self {
            Intent::Availability => "DISPONIBILITE",
            Intent::Booking => "RDV",
            Intent::CabinetInfo => "INFO_CABINET",
            Intent::Cancellation => "ANNULATION",
            Intent::Greeting => "SALUTATION",
            Intent::Farewell => "AU_REVOIR",
            Intent::Thanks => "REMERCIEMENT",
            Intent::MyAppointments => "MES_RDV",
            Intent::Help => "AIDE",
        }
    }

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Intent::Availability => &[
                "disponibilite", "disponible", "disponibilites", "creneau", "creneaux", "libre",
                "libres", "horaires", "quand etes-vous", "quand est-ce", "quelles heures",
                "quelles sont les disponibilites", "quels creneaux", "dispo",
            ],
            Intent::Booking => &[
                "rendez-vous", "rdv", "rendez vous", "prendre rdv", "prendre rendez-vous",
                "reserver", "je veux prendre", "j'aimerais prendre", "souhaiterais prendre",
                "je souhaite", "je veux un", "j'aimerais un", "besoin d'un rdv", "fixer",
                "programmer", "planifier",
            ],
            Intent::CabinetInfo => &[
                "cabinet", "information", "infos", "adresse", "telephone", "tel", "contact",
                "ou est", "localisation", "ou se trouve", "situe", "comment contacter",
                "coordonnees",
            ],
            Intent::Cancellation => &[
                "annuler", "supprimer", "retirer", "cancel", "annule", "supprime", "retire",
                "annulation", "je veux annuler", "je souhaite annuler", "j'aimerais annuler",
            ],
            Intent::Greeting => &[
                "bonjour", "salut", "hello", "hi", "coucou", "bonsoir", "salutations", "hey",
            ],
            Intent::Farewell => &[
                "au revoir", "aurevoir", "au-revoir", "bye", "bye bye", "goodbye", "a bientot",
                "a plus", "ciao", "adieu", "a la prochaine", "bonne journee", "bonne soiree",
            ],
            Intent::Thanks => &[
                "merci", "merci beaucoup", "remercier", "thanks", "thank you", "merci bien",
                "je vous remercie", "c'est gentil",
            ],
            Intent::MyAppointments => &[
                "mes rendez-vous", "mes rdv", "mon rendez-vous", "mes rendez vous",
                "liste de mes", "mes consultations", "quels sont mes", "voir mes rendez-vous",
                "consulter mes rendez-vous", "mes appointments",
            ],
            Intent::Help => &[
                "aide", "help", "comment faire", "que puis-je", "qu'est-ce que", "quoi",
                "aide-moi", "aidez-moi", "je ne comprends pas", "explique", "expliquer",
            ],
        }
    }

    /// Whether this category is detected in the already-normalized message.
    pub fn detected_in(&self, normalized: &str) -> bool {
        detect(normalized, self.keywords())
    }
}

/// Lower-case and strip French diacritics so keyword lists only need the
/// unaccented form.
pub fn normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| match c {
            'à' | 'â' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'î' | 'ï' => 'i',
            'ô' | 'ö' => 'o',
            'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Layered matching: whole-message equality, substring containment for
/// keywords long enough to be unambiguous, per-word equality, then a
/// per-word edit-distance pass that tolerates one typo in longer words.
pub fn detect(message: &str, keywords: &[&str]) -> bool {
    let message = message.trim();
    if message.is_empty() {
        return false;
    }

    for keyword in keywords {
        if message == *keyword {
            return true;
        }
        if keyword.chars().count() > 5 && message.contains(keyword) {
            return true;
        }
    }

    for word in message.split_whitespace() {
        for keyword in keywords {
            if word == *keyword {
                return true;
            }
            let word_len = word.chars().count();
            let keyword_len = keyword.chars().count();
            if keyword_len > 5 && word_len > 4 {
                let distance = strsim::levenshtein(word, keyword);
                if distance <= 1 && distance < word_len.min(keyword_len) / 3 {
                    return true;
                }
            }
        }
    }

    false
}
