use serde::{Deserialize, Serialize};

use crate::store::StoreError;

/// Macro to generate enum with as_str + std::str::FromStr pattern
macro_rules! str_enum {
    ($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $s),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = StoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($s => Ok(Self::$variant)),+,
                    _ => Err(StoreError::InvalidEnum {
                        field: stringify!($name).into(),
                        value: s.into(),
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

str_enum!(ReminderStatus {
    Pending => "pending",
    Sent => "sent",
    Taken => "taken",
    Missed => "missed",
    Skipped => "skipped",
});

impl ReminderStatus {
    /// Terminal statuses accept no further patient action.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Taken | Self::Missed)
    }
}

str_enum!(ReminderAction {
    Taken => "taken",
    Missed => "missed",
    Skipped => "skipped",
    Snoozed => "snoozed",
});

str_enum!(MealRelation {
    BeforeMeal => "before_meal",
    AfterMeal => "after_meal",
    WithMeal => "with_meal",
    EmptyStomach => "empty_stomach",
    Anytime => "anytime",
});

impl MealRelation {
    /// Suffix appended to the notification body.
    pub fn notification_suffix(&self) -> &'static str {
        match self {
            Self::BeforeMeal => " (before meal)",
            Self::AfterMeal => " (after meal)",
            Self::WithMeal => " (with meal)",
            Self::EmptyStomach => " (on empty stomach)",
            Self::Anytime => "",
        }
    }
}

str_enum!(PrescriptionStatus {
    Active => "active",
    Completed => "completed",
    Cancelled => "cancelled",
    Paused => "paused",
});

str_enum!(DoseFrequency {
    OnceDaily => "once_daily",
    TwiceDaily => "twice_daily",
    ThreeTimesDaily => "three_times_daily",
    FourTimesDaily => "four_times_daily",
    AsNeeded => "as_needed",
});
